use crate::error::{CopseError, CopseResult};
use crate::storage::codec::DecodedData;

pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> CopseResult<DecodedData<u32>> {
        if bytes.len() < 4 {
            return Err(CopseError::Storage(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        let data = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok((data, 4))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> CopseResult<DecodedData<i32>> {
        if bytes.len() < 4 {
            return Err(CopseError::Storage(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        let data = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok((data, 4))
    }

    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + data.len());
        bytes.extend(CommonCodec::encode_u32(data.len() as u32));
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> CopseResult<DecodedData<Vec<u8>>> {
        let (length, offset) = CommonCodec::decode_u32(bytes)?;
        let length = length as usize;
        if bytes.len() < offset + length {
            return Err(CopseError::Storage(format!(
                "bytes length {} is less than expected {}",
                bytes.len(),
                offset + length
            )));
        }
        let data = bytes[offset..offset + length].to_vec();
        Ok((data, offset + length))
    }

    pub fn encode_string(data: &str) -> Vec<u8> {
        CommonCodec::encode_bytes(data.as_bytes())
    }

    pub fn decode_string(bytes: &[u8]) -> CopseResult<DecodedData<String>> {
        let (data, offset) = CommonCodec::decode_bytes(bytes)?;
        let string = String::from_utf8(data)
            .map_err(|e| CopseError::Storage(format!("invalid utf-8 string: {}", e)))?;
        Ok((string, offset))
    }
}
