/// 请求/响应帧定义
///
/// 10字节固定控制字 + 负载，大端序

use bytes::{BufMut, Bytes, BytesMut};

/// 控制字长度
pub const HEADER_LEN: usize = 10;

/// 协议版本
pub const FRAME_VERSION: u8 = 1;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameCode {
    /// Confirmable request, a response is expected
    Con = 0,
    /// Non-confirmable request, fire-and-forget
    Non = 1,
    /// Successful response
    Ack = 2,
    /// Reset: the peer rejected the call, first payload byte is the error code
    Rst = 3,
}

impl TryFrom<u8> for FrameCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameCode::Con),
            1 => Ok(FrameCode::Non),
            2 => Ok(FrameCode::Ack),
            3 => Ok(FrameCode::Rst),
            other => Err(FrameError::UnknownCode(other)),
        }
    }
}

impl From<FrameCode> for u8 {
    fn from(code: FrameCode) -> Self {
        code as u8
    }
}

/// 分块标志
///
/// bit 7 表示后续还有分块，低7位为分块序号（模128）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlag(u8);

impl BlockFlag {
    const MORE: u8 = 0x80;
    const NUM_MASK: u8 = 0x7f;

    /// Not part of a block transfer
    pub fn none() -> Self {
        Self(0)
    }

    pub fn block(number: usize, more: bool) -> Self {
        let num = (number & Self::NUM_MASK as usize) as u8;
        Self(if more { num | Self::MORE } else { num })
    }

    pub fn has_more(&self) -> bool {
        (self.0 & Self::MORE) != 0
    }

    pub fn number(&self) -> u8 {
        self.0 & Self::NUM_MASK
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn from_raw(value: u8) -> Self {
        Self(value)
    }
}

/// 控制字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub version: u8,
    pub code: FrameCode,
    pub block: BlockFlag,
    /// Remote service identifier
    pub rid: u16,
    pub token: u16,
    pub payload_len: u16,
}

impl ControlWord {
    pub fn new(code: FrameCode, rid: u16, token: u16) -> Self {
        Self {
            version: FRAME_VERSION,
            code,
            block: BlockFlag::none(),
            rid,
            token,
            payload_len: 0,
        }
    }

    /// 序列化为字节数组 (大端序)
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = self.version;
        bytes[1] = u8::from(self.code);
        bytes[2] = self.block.raw();
        bytes[4..6].copy_from_slice(&self.rid.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.token.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes
    }

    /// 从字节数组反序列化 (大端序)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::ShortHeader(bytes.len()));
        }

        let version = bytes[0];
        if version != FRAME_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            code: FrameCode::try_from(bytes[1])?,
            block: BlockFlag::from_raw(bytes[2]),
            rid: u16::from_be_bytes([bytes[4], bytes[5]]),
            token: u16::from_be_bytes([bytes[6], bytes[7]]),
            payload_len: u16::from_be_bytes([bytes[8], bytes[9]]),
        })
    }
}

/// 帧结构
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub control: ControlWord,
    pub payload: Bytes,
}

impl Frame {
    /// 创建新帧
    ///
    /// Fails when the payload does not fit the 16-bit length field.
    pub fn new(code: FrameCode, rid: u16, token: u16, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        let payload_len = u16::try_from(payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

        let mut control = ControlWord::new(code, rid, token);
        control.payload_len = payload_len;
        Ok(Self { control, payload })
    }

    pub fn con(rid: u16, token: u16, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(FrameCode::Con, rid, token, payload)
    }

    pub fn non(rid: u16, token: u16, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(FrameCode::Non, rid, token, payload)
    }

    pub fn ack(rid: u16, token: u16, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(FrameCode::Ack, rid, token, payload)
    }

    pub fn rst(rid: u16, token: u16, error_code: u8) -> Result<Self, FrameError> {
        Self::new(FrameCode::Rst, rid, token, Bytes::copy_from_slice(&[error_code]))
    }

    pub fn with_block(mut self, block: BlockFlag) -> Self {
        self.control.block = block;
        self
    }

    pub fn code(&self) -> FrameCode {
        self.control.code
    }

    pub fn rid(&self) -> u16 {
        self.control.rid
    }

    pub fn token(&self) -> u16 {
        self.control.token
    }

    pub fn block(&self) -> BlockFlag {
        self.control.block
    }

    /// Error code carried by an RST frame, 0 when the payload is empty
    pub fn error_code(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// 序列化
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_len());
        buf.put_slice(&self.control.to_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 反序列化
    ///
    /// Trailing bytes beyond `payload_len` are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let control = ControlWord::from_bytes(bytes)?;
        let end = HEADER_LEN + control.payload_len as usize;
        if bytes.len() < end {
            return Err(FrameError::TruncatedPayload {
                expected: control.payload_len as usize,
                actual: bytes.len() - HEADER_LEN,
            });
        }

        Ok(Self {
            control,
            payload: Bytes::copy_from_slice(&bytes[HEADER_LEN..end]),
        })
    }
}

/// 帧错误类型
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Header too short: {0} bytes")]
    ShortHeader(usize),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown frame code: {0}")]
    UnknownCode(u8),

    #[error("Payload truncated: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("Payload of {0} bytes does not fit a single frame")]
    PayloadTooLarge(usize),
}
