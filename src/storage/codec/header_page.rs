use crate::buffer::PAGE_SIZE;
use crate::error::{CopseError, CopseResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::HeaderPage;

/**
 * Header page format:
 *  -----------------------------------------------------------------
 * | RecordCount (4) | NameLen (4) + Name + RootPageId (4) | ...     |
 *  -----------------------------------------------------------------
 */
pub struct HeaderPageCodec;

impl HeaderPageCodec {
    pub fn encode(page: &HeaderPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(CommonCodec::encode_u32(page.records.len() as u32));
        for (name, root_page_id) in page.records.iter() {
            bytes.extend(CommonCodec::encode_string(name));
            bytes.extend(CommonCodec::encode_i32(*root_page_id));
        }
        assert!(bytes.len() <= PAGE_SIZE, "header page overflows the frame");
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> CopseResult<DecodedData<HeaderPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(CopseError::Storage(format!(
                "header page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;

        let (count, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, offset) = CommonCodec::decode_string(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (root_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            records.push((name, root_page_id));
        }

        Ok((HeaderPage { records }, PAGE_SIZE))
    }
}
