//! Request/response frames and their stream encoding.

use axo_mobility::{decode_exact, encode_segments, Kwargs};
use axo_types::{AxoError, AxoResult, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::{self, Read, Write};

/// Parts in a request message.
pub const REQUEST_PARTS: usize = 3;

/// Parts in a response message.
pub const RESPONSE_PARTS: usize = 5;

/// Status code of a successful response.
pub const STATUS_OK: i32 = 0;

/// Upper bound on the number of parts in one message.
pub const MAX_PARTS: u32 = 16;

/// Upper bound on the size of one part.
pub const MAX_PART_LEN: u32 = 256 * 1024 * 1024;

/// Operations an endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Ping,
    PutMetadata,
    MethodExec,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Ping => "PING",
            Operation::PutMetadata => "PUT_METADATA",
            Operation::MethodExec => "METHOD_EXEC",
        }
    }

    pub fn parse(name: &str) -> AxoResult<Self> {
        match name {
            "PING" => Ok(Operation::Ping),
            "PUT_METADATA" => Ok(Operation::PutMetadata),
            "METHOD_EXEC" => Ok(Operation::MethodExec),
            other => Err(AxoError::bad_request(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn utf8(part: Vec<u8>, field: &str) -> AxoResult<String> {
    String::from_utf8(part)
        .map_err(|_| AxoError::transport(format!("{} part is not UTF-8", field)))
}

/// `[topic, operation, payload]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub topic: String,
    pub operation: Operation,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(topic: impl Into<String>, operation: Operation, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            operation,
            payload,
        }
    }

    pub fn into_parts(self) -> Vec<Vec<u8>> {
        vec![
            self.topic.into_bytes(),
            self.operation.as_str().as_bytes().to_vec(),
            self.payload,
        ]
    }

    pub fn from_parts(parts: Vec<Vec<u8>>) -> AxoResult<Self> {
        if parts.len() != REQUEST_PARTS {
            return Err(AxoError::transport(format!(
                "request has {} parts, expected {}",
                parts.len(),
                REQUEST_PARTS
            )));
        }
        let mut parts = parts.into_iter();
        let topic = utf8(parts.next().unwrap_or_default(), "topic")?;
        let operation = Operation::parse(&utf8(parts.next().unwrap_or_default(), "operation")?)?;
        let payload = parts.next().unwrap_or_default();
        Ok(Self {
            topic,
            operation,
            payload,
        })
    }
}

/// Server-side details attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub endpoint_id: String,
    pub service_time_ms: u64,
}

/// `[topic, operation echo, status, metadata, result]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub topic: String,
    pub operation: String,
    pub status: i32,
    pub metadata: ResponseMetadata,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(request: &Request, metadata: ResponseMetadata, payload: Vec<u8>) -> Self {
        Self {
            topic: request.topic.clone(),
            operation: request.operation.as_str().to_string(),
            status: STATUS_OK,
            metadata,
            payload,
        }
    }

    /// Error response; the payload carries the error message.
    pub fn error(
        topic: impl Into<String>,
        operation: impl Into<String>,
        metadata: ResponseMetadata,
        err: &AxoError,
    ) -> Self {
        Self {
            topic: topic.into(),
            operation: operation.into(),
            status: err.kind.code(),
            metadata,
            payload: err.message.clone().into_bytes(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn into_parts(self) -> AxoResult<Vec<Vec<u8>>> {
        let metadata = serde_json::to_vec(&self.metadata)
            .map_err(|err| AxoError::internal(format!("response metadata: {}", err)))?;
        Ok(vec![
            self.topic.into_bytes(),
            self.operation.into_bytes(),
            self.status.to_le_bytes().to_vec(),
            metadata,
            self.payload,
        ])
    }

    pub fn from_parts(parts: Vec<Vec<u8>>) -> AxoResult<Self> {
        if parts.len() != RESPONSE_PARTS {
            return Err(AxoError::transport(format!(
                "response has {} parts, expected {}",
                parts.len(),
                RESPONSE_PARTS
            )));
        }
        let mut parts = parts.into_iter();
        let topic = utf8(parts.next().unwrap_or_default(), "topic")?;
        let operation = utf8(parts.next().unwrap_or_default(), "operation")?;
        let status_bytes: [u8; 4] = parts
            .next()
            .unwrap_or_default()
            .try_into()
            .map_err(|_| AxoError::transport("status part must be 4 bytes"))?;
        let metadata = serde_json::from_slice(&parts.next().unwrap_or_default())
            .map_err(|err| AxoError::transport(format!("response metadata: {}", err)))?;
        Ok(Self {
            topic,
            operation,
            status: i32::from_le_bytes(status_bytes),
            metadata,
            payload: parts.next().unwrap_or_default(),
        })
    }

    /// Turns a non-zero status back into the error it encodes.
    pub fn into_result(self) -> AxoResult<Vec<u8>> {
        if self.is_ok() {
            return Ok(self.payload);
        }
        let kind = ErrorKind::from_code(self.status).unwrap_or(ErrorKind::InternalError);
        Err(AxoError::new(
            kind,
            String::from_utf8_lossy(&self.payload).into_owned(),
        ))
    }
}

/// Payload of a `METHOD_EXEC` request.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodExecRequest {
    pub key: String,
    pub method: String,
    pub frame: Vec<u8>,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl MethodExecRequest {
    pub fn encode(&self) -> AxoResult<Vec<u8>> {
        let args = serde_json::to_vec(&self.args)
            .map_err(|err| AxoError::validation(format!("args: {}", err)))?;
        let kwargs = serde_json::to_vec(&self.kwargs)
            .map_err(|err| AxoError::validation(format!("kwargs: {}", err)))?;
        encode_segments(&[
            self.key.as_bytes(),
            self.method.as_bytes(),
            self.frame.as_slice(),
            args.as_slice(),
            kwargs.as_slice(),
        ])
    }

    pub fn decode(bytes: &[u8]) -> AxoResult<Self> {
        let mut segments = decode_exact(bytes, 5)?.into_iter();
        let mut next = || segments.next().unwrap_or_default();
        let key = String::from_utf8(next())
            .map_err(|_| AxoError::validation("method exec key is not UTF-8"))?;
        let method = String::from_utf8(next())
            .map_err(|_| AxoError::validation("method name is not UTF-8"))?;
        let frame = next();
        let args = serde_json::from_slice(&next())
            .map_err(|err| AxoError::validation(format!("args: {}", err)))?;
        let kwargs = serde_json::from_slice(&next())
            .map_err(|err| AxoError::validation(format!("kwargs: {}", err)))?;
        Ok(Self {
            key,
            method,
            frame,
            args,
            kwargs,
        })
    }
}

pub(crate) fn io_error(err: io::Error, context: &str) -> AxoError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            AxoError::timeout(format!("{}: {}", context, err))
        }
        _ => AxoError::transport(format!("{}: {}", context, err)),
    }
}

/// Writes a multipart message: part count, then length-prefixed parts.
pub fn write_message<W: Write>(writer: &mut W, parts: &[Vec<u8>]) -> AxoResult<()> {
    let count = u32::try_from(parts.len())
        .ok()
        .filter(|count| *count <= MAX_PARTS)
        .ok_or_else(|| AxoError::transport(format!("too many parts: {}", parts.len())))?;
    let mut buffer = Vec::with_capacity(4 + parts.iter().map(|p| 4 + p.len()).sum::<usize>());
    buffer.extend_from_slice(&count.to_be_bytes());
    for part in parts {
        let len = u32::try_from(part.len())
            .ok()
            .filter(|len| *len <= MAX_PART_LEN)
            .ok_or_else(|| AxoError::transport(format!("part too large: {}", part.len())))?;
        buffer.extend_from_slice(&len.to_be_bytes());
        buffer.extend_from_slice(part);
    }
    writer
        .write_all(&buffer)
        .and_then(|_| writer.flush())
        .map_err(|err| io_error(err, "write"))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Reads one multipart message. Returns `None` on a clean end of stream.
pub fn read_message<R: Read>(reader: &mut R) -> AxoResult<Option<Vec<Vec<u8>>>> {
    let count = match read_u32(reader) {
        Ok(count) => count,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(io_error(err, "read")),
    };
    if count > MAX_PARTS {
        return Err(AxoError::transport(format!("too many parts: {}", count)));
    }
    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_u32(reader).map_err(|err| io_error(err, "read part length"))?;
        if len > MAX_PART_LEN {
            return Err(AxoError::transport(format!("part too large: {}", len)));
        }
        let mut part = vec![0u8; len as usize];
        reader
            .read_exact(&mut part)
            .map_err(|err| io_error(err, "read part"))?;
        parts.push(part);
    }
    Ok(Some(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_operation_names() {
        for op in [Operation::Ping, Operation::PutMetadata, Operation::MethodExec] {
            assert_eq!(Operation::parse(op.as_str()).unwrap(), op);
        }
        let err = Operation::parse("EXPLODE").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_request_part_count_enforced() {
        let request = Request::new("obj", Operation::Ping, b"hi".to_vec());
        let parts = request.clone().into_parts();
        assert_eq!(Request::from_parts(parts).unwrap(), request);

        let err = Request::from_parts(vec![b"a".to_vec(), b"PING".to_vec()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
    }

    #[test]
    fn test_response_status_is_little_endian() {
        let request = Request::new("obj", Operation::Ping, Vec::new());
        let err = AxoError::not_found("gone");
        let response = Response::error("obj", "PING", ResponseMetadata::default(), &err);
        let parts = response.into_parts().unwrap();
        assert_eq!(parts.len(), RESPONSE_PARTS);
        assert_eq!(parts[2], ErrorKind::NotFound.code().to_le_bytes().to_vec());

        let decoded = Response::from_parts(parts).unwrap();
        let err = decoded.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "gone");

        let ok = Response::ok(&request, ResponseMetadata::default(), b"pong".to_vec());
        assert_eq!(ok.operation, "PING");
        assert_eq!(ok.into_result().unwrap(), b"pong");
    }

    #[test]
    fn test_response_part_count_enforced() {
        let err = Response::from_parts(vec![Vec::new(); 4]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
    }

    #[test]
    fn test_method_exec_payload() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("scale".to_string(), json!(2));
        let request = MethodExecRequest {
            key: "k1".to_string(),
            method: "increment".to_string(),
            frame: vec![0, 1, 2, 255],
            args: vec![json!(5), json!("x")],
            kwargs,
        };
        let decoded = MethodExecRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);

        let err = MethodExecRequest::decode(&encode_segments(&[b"k1"]).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_stream_messages() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &[b"a".to_vec(), Vec::new(), b"ccc".to_vec()]).unwrap();
        write_message(&mut buffer, &[b"next".to_vec()]).unwrap();

        let mut reader = Cursor::new(buffer);
        let first = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(first, vec![b"a".to_vec(), Vec::new(), b"ccc".to_vec()]);
        let second = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(second, vec![b"next".to_vec()]);
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &[b"abcdef".to_vec()]).unwrap();
        buffer.truncate(buffer.len() - 2);
        let err = read_message(&mut Cursor::new(buffer)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
    }
}
