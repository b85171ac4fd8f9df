mod common;
mod header_page;
mod index_page;

pub use common::CommonCodec;
pub use header_page::HeaderPageCodec;
pub use index_page::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec,
    BPlusTreePageTypeCodec, RidCodec,
};

// data + consumed offset
pub type DecodedData<T> = (T, usize);
