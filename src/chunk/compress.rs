use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use futures_util::Stream;

use crate::config::CompressionFormat;

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
    DeflateRaw(DeflateEncoder<Vec<u8>>),
}

impl Encoder {
    fn new(format: CompressionFormat) -> Self {
        let level = Compression::default();
        match format {
            CompressionFormat::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), level)),
            CompressionFormat::Deflate => Encoder::Deflate(ZlibEncoder::new(Vec::new(), level)),
            CompressionFormat::DeflateRaw => {
                Encoder::DeflateRaw(DeflateEncoder::new(Vec::new(), level))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.write_all(data),
            Encoder::Deflate(e) => e.write_all(data),
            Encoder::DeflateRaw(e) => e.write_all(data),
        }
    }

    /// Drain the compressed bytes produced so far.
    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Encoder::Gzip(e) => std::mem::take(e.get_mut()),
            Encoder::Deflate(e) => std::mem::take(e.get_mut()),
            Encoder::DeflateRaw(e) => std::mem::take(e.get_mut()),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Gzip(e) => e.finish(),
            Encoder::Deflate(e) => e.finish(),
            Encoder::DeflateRaw(e) => e.finish(),
        }
    }
}

/// Stream adapter compressing every block of the inner stream.
///
/// Output is yielded as soon as the encoder flushes some of it; the trailer
/// follows once the inner stream ends.
pub struct Compressed<S> {
    inner: S,
    encoder: Option<Encoder>,
}

impl<S> Compressed<S> {
    pub fn new(inner: S, format: CompressionFormat) -> Self {
        Self {
            inner,
            encoder: Some(Encoder::new(format)),
        }
    }
}

impl<S> Stream for Compressed<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(block))) => {
                    if let Err(e) = encoder.write(&block) {
                        this.encoder = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                    let output = encoder.take_output();
                    if !output.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(output))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let tail = match this.encoder.take() {
                        Some(encoder) => encoder.finish(),
                        None => return Poll::Ready(None),
                    };
                    return match tail {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => Poll::Ready(Some(Ok(Bytes::from(tail)))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

/// Compress a whole in-memory payload.
pub fn compress_bytes(data: &[u8], format: CompressionFormat) -> io::Result<Bytes> {
    let mut encoder = Encoder::new(format);
    encoder.write(data)?;
    let mut output = encoder.take_output();
    output.extend(encoder.finish()?);
    Ok(Bytes::from(output))
}
