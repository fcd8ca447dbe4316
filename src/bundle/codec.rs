//! Storage encoding of bundles.
//!
//! This is the byte layout persisted by the disk and redb backends and the
//! basis of every quota computation. It is not the bundle protocol wire
//! format:
//!
//! ```text
//! [version u8][flags][source][destination][report-to][custodian]
//! [timestamp][sequence][lifetime]
//! ([fragment offset][app data length])   fragments only
//! [hop count present u8]([hop count])
//! [network priority, zig-zag]
//! [block count] { [type u8][flags][data] }*
//! ```
//!
//! Numbers are SDNVs, strings and block data are SDNV length-prefixed.

use super::{Block, Bundle, BundleId, Eid, ProcFlags};
use crate::error::{Result, StoreError};
use crate::sdnv::{self, Reader};
use bytes::Bytes;

pub const VERSION: u8 = 0x06;

pub fn encode(bundle: &Bundle) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(bundle));
    encode_primary(bundle, &mut out);
    for block in &bundle.blocks {
        out.push(block.block_type);
        sdnv::encode(block.flags, &mut out);
        sdnv::encode_chunk(&block.data, &mut out);
    }
    out
}

/// Exact length of [`encode`] output, computed without copying payload data.
pub fn encoded_len(bundle: &Bundle) -> usize {
    let mut primary = Vec::new();
    encode_primary(bundle, &mut primary);
    let blocks: usize = bundle
        .blocks
        .iter()
        .map(|b| {
            1 + sdnv::encoded_len(b.flags)
                + sdnv::encoded_len(b.data.len() as u64)
                + b.data.len()
        })
        .sum();
    primary.len() + blocks
}

pub fn decode(buf: &[u8]) -> Result<Bundle> {
    let mut reader = Reader::new(buf);

    let version = reader.byte()?;
    if version != VERSION {
        return Err(StoreError::Serialization(format!(
            "unsupported bundle encoding version {version:#04x}"
        )));
    }

    let flags = ProcFlags::new(reader.number()?);
    let source = eid(&mut reader)?;
    let destination = eid(&mut reader)?;
    let report_to = eid(&mut reader)?;
    let custodian = eid(&mut reader)?;
    let timestamp = reader.number()?;
    let sequence = reader.number()?;
    let lifetime = reader.number()?;

    let (id, app_data_length) = if flags.contains(ProcFlags::FRAGMENT) {
        let offset = reader.number()?;
        let app_data_length = reader.number()?;
        (
            BundleId::fragment(source, timestamp, sequence, offset),
            app_data_length,
        )
    } else {
        (BundleId::new(source, timestamp, sequence), 0)
    };

    let hop_count = match reader.byte()? {
        0 => None,
        _ => Some(reader.number()?),
    };
    let net_priority = unzigzag(reader.number()?)?;

    let count = reader.number()?;
    let mut blocks = Vec::new();
    for _ in 0..count {
        let block_type = reader.byte()?;
        let block_flags = reader.number()?;
        let data = Bytes::copy_from_slice(reader.chunk()?);
        blocks.push(Block::new(block_type, block_flags, data));
    }

    if reader.remaining() != 0 {
        return Err(StoreError::Serialization(format!(
            "{} trailing bytes after bundle at offset {}",
            reader.remaining(),
            reader.position()
        )));
    }

    let mut bundle = Bundle::new(id, destination);
    bundle.set_flags(flags);
    bundle.report_to = report_to;
    bundle.custodian = custodian;
    bundle.lifetime = lifetime;
    bundle.app_data_length = app_data_length;
    bundle.hop_count = hop_count;
    bundle.net_priority = net_priority;
    bundle.blocks = blocks;
    Ok(bundle)
}

fn encode_primary(bundle: &Bundle, out: &mut Vec<u8>) {
    let id = bundle.id();
    out.push(VERSION);
    sdnv::encode(bundle.flags().bits(), out);
    sdnv::encode_chunk(id.source().as_str().as_bytes(), out);
    sdnv::encode_chunk(bundle.destination.as_str().as_bytes(), out);
    sdnv::encode_chunk(bundle.report_to.as_str().as_bytes(), out);
    sdnv::encode_chunk(bundle.custodian.as_str().as_bytes(), out);
    sdnv::encode(id.timestamp(), out);
    sdnv::encode(id.sequence(), out);
    sdnv::encode(bundle.lifetime, out);
    if id.is_fragment() {
        sdnv::encode(id.fragment_offset(), out);
        sdnv::encode(bundle.app_data_length, out);
    }
    match bundle.hop_count {
        Some(hops) => {
            out.push(1);
            sdnv::encode(hops, out);
        }
        None => out.push(0),
    }
    sdnv::encode(zigzag(bundle.net_priority), out);
    sdnv::encode(bundle.blocks.len() as u64, out);
}

fn eid(reader: &mut Reader<'_>) -> Result<Eid> {
    let raw = reader.chunk()?;
    let uri = std::str::from_utf8(raw)
        .map_err(|e| StoreError::Serialization(format!("invalid EID: {e}")))?;
    Ok(Eid::new(uri))
}

fn zigzag(value: i32) -> u64 {
    u64::from(((value << 1) ^ (value >> 31)) as u32)
}

fn unzigzag(value: u64) -> Result<i32> {
    let value = u32::try_from(value).map_err(|_| {
        StoreError::Serialization(format!("network priority out of range: {value}"))
    })?;
    Ok(((value >> 1) as i32) ^ -((value & 1) as i32))
}
