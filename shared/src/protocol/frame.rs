//! 길이 prefix 프레임 코덱
//!
//! # 프레임 구조
//!
//! ```text
//! [4바이트 길이 (BE)][2바이트 메시지 ID (BE)][페이로드]
//! ```
//!
//! 길이 필드는 메시지 ID와 페이로드를 합친 크기입니다.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::tool::error::{AppError, AppResult};

/// 길이 헤더 크기
pub const LENGTH_HEADER_SIZE: usize = 4;

/// 메시지 ID 크기
pub const MSG_ID_SIZE: usize = 2;

/// 허용되는 최대 프레임 크기 (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 전송 단위 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            payload: payload.into(),
        }
    }

    /// 페이로드 없는 프레임
    pub fn empty(msg_id: u16) -> Self {
        Self::new(msg_id, Bytes::new())
    }

    /// JSON 본문을 가진 프레임 생성
    pub fn json<T: Serialize>(msg_id: u16, body: &T) -> AppResult<Self> {
        let data = serde_json::to_vec(body)?;
        Ok(Self::new(msg_id, data))
    }

    /// JSON 본문 역직렬화
    pub fn parse_json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_slice(&self.payload).map_err(AppError::from)
    }

    /// 헤더를 포함한 전송 크기
    pub fn wire_len(&self) -> usize {
        LENGTH_HEADER_SIZE + MSG_ID_SIZE + self.payload.len()
    }

    /// 버퍼에 인코딩합니다.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        buf.put_u32((MSG_ID_SIZE + self.payload.len()) as u32);
        buf.put_u16(self.msg_id);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// 버퍼에서 완성된 프레임 하나를 꺼냅니다.
    ///
    /// 데이터가 부족하면 `Ok(None)`을 반환하고 버퍼는 그대로 둡니다.
    pub fn decode(buf: &mut BytesMut) -> AppResult<Option<Self>> {
        if buf.len() < LENGTH_HEADER_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        Self::check_length(length)?;

        if buf.len() < LENGTH_HEADER_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_HEADER_SIZE);
        let mut body = buf.split_to(length);
        let msg_id = body.get_u16();

        Ok(Some(Self {
            msg_id,
            payload: body.freeze(),
        }))
    }

    /// 스트림에서 프레임 하나를 읽습니다.
    pub async fn read_from<R>(reader: &mut R) -> AppResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut length_bytes = [0u8; LENGTH_HEADER_SIZE];
        reader.read_exact(&mut length_bytes).await?;
        let length = u32::from_be_bytes(length_bytes) as usize;
        Self::check_length(length)?;

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;

        let mut body = Bytes::from(body);
        let msg_id = body.get_u16();
        Ok(Self {
            msg_id,
            payload: body,
        })
    }

    /// 스트림에 프레임을 씁니다.
    pub async fn write_to<W>(&self, writer: &mut W) -> AppResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn check_length(length: usize) -> AppResult<()> {
        if length < MSG_ID_SIZE {
            return Err(AppError::InvalidFormat(format!(
                "프레임 길이가 너무 짧습니다: {}",
                length
            )));
        }
        if length > MAX_FRAME_SIZE {
            return Err(AppError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let frame = Frame::new(1001, &b"hello"[..]);
        let bytes = frame.to_bytes();

        let mut partial = BytesMut::from(&bytes[..5]);
        assert_eq!(Frame::decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), 5);

        partial.extend_from_slice(&bytes[5..]);
        let decoded = Frame::decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut buf = BytesMut::new();
        Frame::new(1, &b"a"[..]).encode(&mut buf);
        Frame::empty(2).encode(&mut buf);

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().msg_id, 1);
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.msg_id, 2);
        assert!(second.payload.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.put_u16(1);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(AppError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = Frame::json(10, &serde_json::json!({ "user_id": 42 })).unwrap();

        frame.write_to(&mut client).await.unwrap();
        let read = Frame::read_from(&mut server).await.unwrap();

        assert_eq!(read.msg_id, 10);
        let body: serde_json::Value = read.parse_json().unwrap();
        assert_eq!(body["user_id"], 42);
    }

    #[tokio::test]
    async fn test_read_from_fragmented_stream() {
        let bytes = Frame::new(1002, &b"fragmented"[..]).to_bytes();
        let mut stream = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..7])
            .read(&bytes[7..])
            .build();

        let read = Frame::read_from(&mut stream).await.unwrap();
        assert_eq!(read.msg_id, 1002);
        assert_eq!(&read.payload[..], b"fragmented");
    }

    #[tokio::test]
    async fn test_read_from_closed_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert_eq!(
            Frame::read_from(&mut server).await,
            Err(AppError::ConnectionClosed)
        );
    }
}
