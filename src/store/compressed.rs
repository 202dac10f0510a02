use crate::error::CacheError;
use crate::store::KeyValueStore;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// Codec behind [`CompressedStore`]
pub trait Compression: Send + Sync + 'static {
    /// Tag byte in front of every value this codec produced. Must not be `b'R'`.
    fn tag(&self) -> u8;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;
    /// `original_len` is the length recorded when the value was compressed;
    /// any other inflated length means the value is corrupt.
    fn decompress(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CacheError>;
}

/// Raw deflate via flate2
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompression(flate2::Compression);

impl DeflateCompression {
    pub fn fast() -> Self {
        Self(flate2::Compression::fast())
    }

    pub fn best() -> Self {
        Self(flate2::Compression::best())
    }

    pub fn with_level(level: u32) -> Self {
        Self(flate2::Compression::new(level.min(9)))
    }
}

impl Default for DeflateCompression {
    fn default() -> Self {
        Self(flate2::Compression::default())
    }
}

fn codec_error(e: std::io::Error) -> CacheError {
    CacheError::Compression(e.to_string())
}

impl Compression for DeflateCompression {
    fn tag(&self) -> u8 {
        b'D'
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        // JSON usually shrinks to well under half
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::with_capacity(data.len() / 2), self.0);
        encoder.write_all(data).map_err(codec_error)?;
        encoder.finish().map_err(codec_error)
    }

    fn decompress(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CacheError> {
        let mut out = Vec::with_capacity(original_len);
        // One extra byte is enough to notice a value longer than recorded
        flate2::read::DeflateDecoder::new(data)
            .take(original_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(codec_error)?;

        if out.len() != original_len {
            return Err(CacheError::Compression(format!(
                "inflated {} bytes, expected {}",
                out.len(),
                original_len
            )));
        }
        Ok(out)
    }
}

const RAW_TAG: u8 = b'R';
/// Tag byte plus the big-endian original length
const HEADER_LEN: usize = 1 + 4;

/// Values shorter than this are stored raw
const DEFAULT_MIN_SIZE: usize = 256;

/// Store wrapper that compresses values on the way in.
///
/// Raw values are stored as `R` + bytes. Compressed values are stored as the
/// codec tag, the original length as a big-endian `u32`, then the codec
/// output. A value is only kept compressed when that actually makes it
/// smaller.
pub struct CompressedStore<S, C = DeflateCompression> {
    inner: S,
    compression: C,
    min_size: usize,
}

impl<S: KeyValueStore> CompressedStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_compression(store, DeflateCompression::default())
    }
}

impl<S, C> CompressedStore<S, C>
where
    S: KeyValueStore,
    C: Compression,
{
    pub fn with_compression(store: S, compression: C) -> Self {
        Self {
            inner: store,
            compression,
            min_size: DEFAULT_MIN_SIZE,
        }
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn encode(&self, value: &[u8]) -> Bytes {
        let Ok(original_len) = u32::try_from(value.len()) else {
            return raw(value);
        };
        if value.len() < self.min_size {
            return raw(value);
        }

        match self.compression.compress(value) {
            Ok(compressed) if compressed.len() + HEADER_LEN <= value.len() => {
                let mut buf = BytesMut::with_capacity(compressed.len() + HEADER_LEN);
                buf.put_u8(self.compression.tag());
                buf.put_u32(original_len);
                buf.put_slice(&compressed);
                buf.freeze()
            }
            Ok(_) => raw(value),
            Err(e) => {
                tracing::warn!("Failed to compress value, storing raw: {:?}", e);
                raw(value)
            }
        }
    }

    fn decode(&self, stored: &[u8]) -> Result<Bytes, CacheError> {
        match stored.split_first() {
            Some((&RAW_TAG, rest)) => Ok(Bytes::copy_from_slice(rest)),
            Some((&tag, mut rest)) if tag == self.compression.tag() => {
                if rest.remaining() < 4 {
                    return Err(CacheError::Compression(
                        "compressed value is missing its length".to_string(),
                    ));
                }
                let original_len = rest.get_u32() as usize;
                let inflated = self.compression.decompress(rest, original_len)?;
                Ok(Bytes::from(inflated))
            }
            Some((&tag, _)) => Err(CacheError::Compression(format!(
                "unknown compression tag {:#04x}",
                tag
            ))),
            None => Err(CacheError::Compression("empty stored value".to_string())),
        }
    }
}

fn raw(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_u8(RAW_TAG);
    buf.put_slice(payload);
    buf.freeze()
}

#[async_trait::async_trait]
impl<S, C> KeyValueStore for CompressedStore<S, C>
where
    S: KeyValueStore,
    C: Compression,
{
    async fn get_item(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.inner.get_item(key).await? {
            Some(stored) => self.decode(&stored).map(Some),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let encoded = self.encode(&value);
        self.inner.set_item(key, encoded).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove_item(key).await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.get_all_keys().await
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), CacheError> {
        self.inner.multi_remove(keys).await
    }
}
