use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};
use std::cmp::Ordering;

use super::ParseError;

/// Maximum number of compression pointers followed while reading one name
const MAX_POINTER_JUMPS: usize = 64;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    fn read_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;

    /// Read a possibly compressed name, resolving pointers against the whole packet
    fn read_labels_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<Vec<String>, ParseError> {
        let mut labels = Vec::new();
        loop {
            let label_len = reader.read_var::<u8>(8)?;
            if label_len == 0 {
                break;
            }
            if label_len & 0xC0 == 0xC0 {
                let low = reader.read_var::<u8>(8)?;
                let offset = (usize::from(label_len & 0x3F) << 8) | usize::from(low);
                labels.extend(read_name_at(packet_buf, offset)?);
                break;
            }
            if label_len > 63 {
                return Err(ParseError::InvalidLabel);
            }
            let mut buf = vec![0; label_len as usize];
            reader.read_bytes(&mut buf)?;
            labels.push(String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?);
        }

        Ok(labels)
    }

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        for label in labels.iter().filter(|l| !l.is_empty()) {
            if label.len() > 63 {
                return Err(ParseError::InvalidLabel);
            }
            writer.write_var::<u8>(8, label.len() as u8)?;
            writer.write_bytes(label.as_bytes())?;
        }
        writer.write_var::<u8>(8, 0)?;

        Ok(())
    }
}

/// Decode a name starting at `offset` of a full packet, following pointers.
pub fn read_name_at(packet_buf: &[u8], mut offset: usize) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut jumps = 0;
    loop {
        let label_len = *packet_buf.get(offset).ok_or(ParseError::InvalidLabel)?;
        if label_len == 0 {
            return Ok(labels);
        }
        if label_len & 0xC0 == 0xC0 {
            let low = *packet_buf.get(offset + 1).ok_or(ParseError::InvalidLabel)?;
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::InvalidLabel);
            }
            offset = (usize::from(label_len & 0x3F) << 8) | usize::from(low);
            continue;
        }
        if label_len > 63 {
            return Err(ParseError::InvalidLabel);
        }
        let start = offset + 1;
        let end = start + label_len as usize;
        let bytes = packet_buf.get(start..end).ok_or(ParseError::InvalidLabel)?;
        labels.push(String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?);
        offset = end;
    }
}

/// Parse an uncompressed name embedded in RDATA. Returns the presentation
/// form and the number of bytes consumed.
pub fn parse_rdata_name(data: &[u8]) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut pos = 0;

    loop {
        let len = *data.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        // DNSSEC RDATA names are never compressed
        if len > 63 {
            return None;
        }
        let label = data.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        pos += len;
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };

    Some((name, pos))
}

/// Lower-case a name and strip the trailing dot; the root is `"."`.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// Labels of a name from left to right, root excluded
pub fn name_labels(name: &str) -> Vec<&str> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect()
}

/// Canonical (lower-cased, uncompressed) wire form of a name
pub fn name_to_wire(name: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(name.len() + 2);
    for label in name_labels(name) {
        wire.push(label.len() as u8);
        wire.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
    }
    wire.push(0);
    wire
}

/// Number of labels as counted by the RRSIG labels field
pub fn label_count(name: &str) -> u8 {
    let labels = name_labels(name);
    let count = labels.len() - usize::from(labels.first() == Some(&"*"));
    count as u8
}

/// Name of the enclosing domain, `None` for the root
pub fn parent_name(name: &str) -> Option<String> {
    let labels = name_labels(name);
    match labels.len() {
        0 => None,
        1 => Some(".".to_string()),
        _ => Some(labels[1..].join(".")),
    }
}

/// Canonical DNS name order (RFC 4034 section 6.1): compare label by label
/// starting from the rightmost one, each label as lower-cased octets.
pub fn canonical_name_cmp(a: &str, b: &str) -> Ordering {
    let a_labels = name_labels(a);
    let b_labels = name_labels(b);

    for (x, y) in a_labels.iter().rev().zip(b_labels.iter().rev()) {
        let ord = x
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(y.bytes().map(|c| c.to_ascii_lowercase()));
        if ord != Ordering::Equal {
            return ord;
        }
    }

    a_labels.len().cmp(&b_labels.len())
}
