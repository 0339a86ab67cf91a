use super::{BlzError, BoundsPolicy, Footer, FOOTER_LEN, MAX_MATCH, MIN_OFFSET, THRESHOLD};

/// Most bytes one stream byte can stand for: a control byte plus eight
/// longest matches is 17 bytes for 144.
const MAX_EXPANSION: usize = 8 * MAX_MATCH / 17 + 1;

/// Decode a BLZ block into a freshly allocated buffer, validating everything.
///
/// The block length must be a multiple of four, which is what lets a lost
/// trailing byte be caught instead of misread as a footer.  Coded blocks from
/// other encoders may carry an unaligned raw prefix; decode those with
/// [`BoundsPolicy::Permissive`] through [`decompress_with`].
pub fn decompress(block: &[u8]) -> Result<Vec<u8>, BlzError> {
    decompress_with(block, BoundsPolicy::Strict)
}

pub fn decompress_with(block: &[u8], policy: BoundsPolicy) -> Result<Vec<u8>, BlzError> {
    match policy {
        BoundsPolicy::Strict => decompress_strict(block),
        BoundsPolicy::Permissive => {
            let mut buf = block.to_vec();
            buf.resize(block.len().max(decompressed_len(block)?), 0);
            let len = decompress_in_place(&mut buf, block.len())?;
            buf.truncate(len);
            Ok(buf)
        }
    }
}

/// Size of the data `block` decodes to, read from its footer.
pub fn decompressed_len(block: &[u8]) -> Result<usize, BlzError> {
    match Footer::read(block)? {
        None => Ok(block.len() - 4),
        Some(footer) => {
            let (prefix, _, region) = layout(block.len(), &footer)?;
            Ok(prefix + region)
        }
    }
}

/// Decode the block held in `buf[..compressed_len]` in place.
///
/// `buf` must already be as long as the decoded data; the bytes past
/// `compressed_len` are scratch.  Only the checks needed to stay inside `buf`
/// are made.  Returns the decoded length.
pub fn decompress_in_place(buf: &mut [u8], compressed_len: usize) -> Result<usize, BlzError> {
    if compressed_len > buf.len() {
        return Err(BlzError::OutOfBounds {
            what: "compressed length",
            read_index: compressed_len,
            write_index: 0,
            buffer_len: buf.len(),
        });
    }
    let footer = match Footer::read(&buf[..compressed_len])? {
        None => return Ok(compressed_len - 4),
        Some(footer) => footer,
    };
    let (base, stream, region) = layout(compressed_len, &footer)?;

    if base + region > buf.len() {
        return Err(BlzError::OutOfBounds {
            what: "decoded region",
            read_index: base + stream,
            write_index: base + region,
            buffer_len: buf.len(),
        });
    }

    unpack(buf, base, stream, region, BoundsPolicy::Permissive)?;
    Ok(base + region)
}

fn decompress_strict(block: &[u8]) -> Result<Vec<u8>, BlzError> {
    if block.len() % 4 != 0 {
        return Err(BlzError::footer("block length not word aligned", block.len(), None));
    }
    let footer = match Footer::read(block)? {
        None => return Ok(block[..block.len() - 4].to_vec()),
        Some(footer) => footer,
    };
    let reject = |reason| Err(BlzError::footer(reason, block.len(), Some(&footer)));

    if (footer.header_len as usize) < FOOTER_LEN {
        return reject("header_len smaller than footer");
    }
    let (prefix, stream, region) = layout(block.len(), &footer)?;
    if region <= stream {
        return reject("decoded region not larger than encoded stream");
    }

    let mut out = vec![0u8; prefix + region.max(footer.total_size as usize)];
    out[..block.len()].copy_from_slice(block);
    unpack(&mut out, prefix, stream, region, BoundsPolicy::Strict)?;
    out.truncate(prefix + region);
    Ok(out)
}

/// Split a coded block into (raw prefix, encoded stream, decoded region) lengths.
fn layout(block_len: usize, footer: &Footer) -> Result<(usize, usize, usize), BlzError> {
    let reject = |reason| BlzError::footer(reason, block_len, Some(footer));
    let prefix = block_len
        .checked_sub(footer.total_size as usize)
        .ok_or_else(|| reject("total_size exceeds block length"))?;
    let stream = footer.stream_len().ok_or_else(|| reject("header_len exceeds total_size"))?;
    let region = footer.region_len().ok_or_else(|| reject("negative decoded length"))?;
    if region > stream * MAX_EXPANSION {
        return Err(reject("decoded length exceeds what the stream can encode"));
    }
    Ok((prefix, stream, region))
}

/// Backward bit-unpacking loop shared by both policies.
///
/// `buf[base..]` holds the encoded stream in its first `stream` bytes and
/// receives `region` decoded bytes.  Every cursor move is checked.
fn unpack(
    buf: &mut [u8],
    base: usize,
    stream: usize,
    region: usize,
    policy: BoundsPolicy,
) -> Result<(), BlzError> {
    let buffer_len = buf.len();
    let oob = |what, read: usize, write: usize| BlzError::OutOfBounds {
        what,
        read_index: base + read,
        write_index: base + write,
        buffer_len,
    };

    let mut read = stream;
    let mut write = region;

    while write > 0 {
        if read == 0 {
            return Err(oob("control byte", read, write));
        }
        read -= 1;
        let mut control = buf[base + read];

        for _ in 0..8 {
            if control & 0x80 != 0 {
                if read < 2 {
                    return Err(oob("back-reference", read, write));
                }
                read -= 2;
                let pair = u16::from_le_bytes([buf[base + read], buf[base + read + 1]]) as usize;
                let mut len = (pair >> 12) + THRESHOLD + 1;
                let offset = (pair & 0x0FFF) + MIN_OFFSET;
                // Never copy in front of the region start.
                len = len.min(write);
                write -= len;

                let source_end = write + len + offset;
                let limit = match policy {
                    BoundsPolicy::Strict => region,
                    BoundsPolicy::Permissive => buffer_len - base,
                };
                if source_end > limit {
                    return Err(oob("back-reference source", source_end, write));
                }
                for i in base + write..base + write + len {
                    buf[i] = buf[i + offset];
                }
            } else {
                if read == 0 {
                    return Err(oob("literal", read, write));
                }
                read -= 1;
                write -= 1;
                buf[base + write] = buf[base + read];
            }

            control <<= 1;
            if write == 0 {
                break;
            }
        }
    }
    Ok(())
}
