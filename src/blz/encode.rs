use super::{CompressionMode, Footer, FOOTER_LEN, MAX_MATCH, MAX_OFFSET, MIN_OFFSET, THRESHOLD};

#[derive(Debug, Clone, Copy)]
struct Match {
    len: usize,
    offset: usize,
}

/// Longest match for `buf[pos..]` against the `MAX_OFFSET` bytes before it.
///
/// Offsets are tried nearest first and only a strictly longer match replaces
/// the current one, so ties keep the smallest offset.  A match never extends
/// past its own offset.
fn search(buf: &[u8], pos: usize) -> Match {
    let mut best = Match { len: THRESHOLD, offset: 0 };
    let max = pos.min(MAX_OFFSET);

    for offset in MIN_OFFSET..=max {
        let mut len = 0;
        while len < MAX_MATCH
            && pos + len < buf.len()
            && len < offset
            && buf[pos + len] == buf[pos + len - offset]
        {
            len += 1;
        }

        if len > best.len {
            best = Match { len, offset };
            if len == MAX_MATCH {
                break;
            }
        }
    }
    best
}

/// Compress `raw` into a self-describing BLZ block.
///
/// `best` enables the LZ-CUE lookahead.  The result is never longer than
/// `raw.len() + 7`.  When nothing is gained the block is stored; a stored
/// block of an input whose length is not a multiple of four decodes to the
/// input followed by its zero padding.
pub fn compress(raw: &[u8], best: bool) -> Vec<u8> {
    compress_with(raw, if best { CompressionMode::Best } else { CompressionMode::Fast })
}

pub fn compress_with(raw: &[u8], mode: CompressionMode) -> Vec<u8> {
    let raw_len = raw.len();

    // Work on the reversed input so back-references point at lower indices.
    let rev: Vec<u8> = raw.iter().rev().copied().collect();
    let mut pak: Vec<u8> = Vec::with_capacity(raw_len + raw_len.div_ceil(8) + 15);

    // Cheapest cut seen so far: encoded bytes kept + raw bytes left uncoded.
    let mut pak_tmp = 0usize;
    let mut raw_tmp = raw_len;

    let mut pos = 0usize;
    let mut mask = 0u8;
    let mut flag_pos = 0usize;

    while pos < raw_len {
        mask >>= 1;
        if mask == 0 {
            flag_pos = pak.len();
            pak.push(0);
            mask = 0x80;
        }

        let mut chosen = search(&rev, pos);

        // LZ-CUE: give up this match if a literal now buys a better one next.
        if mode.is_best() && chosen.len > THRESHOLD && pos + chosen.len < raw_len {
            let next = search(&rev, pos + chosen.len);
            let post = search(&rev, pos + 1);
            let next_len = if next.len > THRESHOLD { next.len } else { 1 };
            let post_len = if post.len > THRESHOLD { post.len } else { 1 };
            if chosen.len + next_len <= 1 + post_len {
                chosen.len = 1;
            }
        }

        pak[flag_pos] <<= 1;
        if chosen.len > THRESHOLD {
            let len = chosen.len - (THRESHOLD + 1);
            let offset = chosen.offset - MIN_OFFSET;
            pak[flag_pos] |= 1;
            pak.push(((len << 4) | (offset >> 8)) as u8);
            pak.push((offset & 0xFF) as u8);
            pos += chosen.len;
        } else {
            pak.push(rev[pos]);
            pos += 1;
        }

        if pak.len() + (raw_len - pos) < pak_tmp + raw_tmp {
            pak_tmp = pak.len();
            raw_tmp = raw_len - pos;
        }
    }

    // Left-align the bits of a partially filled control byte.
    while mask != 0 && mask != 1 {
        mask >>= 1;
        pak[flag_pos] <<= 1;
    }

    pak.reverse();

    let coded_len = ((pak_tmp + raw_tmp + 3) & !3) + FOOTER_LEN;
    let inc_len = raw_len - pak_tmp - raw_tmp;
    let pad = (4 - (raw_tmp + pak_tmp) % 4) % 4;
    let header_len = FOOTER_LEN + pad;

    // A coded block whose extra_size would be zero reads as stored.
    if pak_tmp == 0 || raw_len + 4 < coded_len - 4 || inc_len == header_len {
        return store(raw);
    }

    let mut out = Vec::with_capacity(coded_len);
    out.extend_from_slice(&raw[..raw_tmp]);
    out.extend_from_slice(&pak[pak.len() - pak_tmp..]);
    out.resize(out.len() + pad, 0xFF);

    let footer = Footer {
        total_size: (pak_tmp + header_len) as u32,
        header_len: header_len as u32,
        extra_size: (inc_len as i64 - header_len as i64) as i32,
    };
    // Writing into a Vec cannot fail.
    let _ = footer.write(&mut out);
    out
}

fn store(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 7);
    out.extend_from_slice(raw);
    out.resize(raw.len().next_multiple_of(4), 0);
    out.extend_from_slice(&[0; 4]);
    out
}
