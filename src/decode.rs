// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! §4.3 worker decode: turns one decompressed `PrimitiveBlock` into the
//! `Vec<Entity>` a worker emits. Pure with respect to its input - no I/O, no
//! shared mutable state, so it can run on any thread in the pool.

use std::collections::HashMap;

use protobuf::Message;

use crate::entity::{Entity, Info, Member, MemberKind, Node, Relation, Way};
use crate::error::{Error, Result};
use crate::proto::osmformat::{self, relation::MemberType, PrimitiveBlock};

/// Parses `data` as a `PrimitiveBlock` and decodes every group inside it into
/// a flat, source-ordered `Vec<Entity>`.
pub fn decode_primitive_block(data: &[u8]) -> Result<Vec<Entity>> {
    let block = PrimitiveBlock::parse_from_bytes(data)?;
    let stringtable = &block.stringtable.s;
    let conv = CoordinateConverter::from_block(&block);
    let date_granularity = block.date_granularity() as i64;

    let mut out = Vec::new();
    for group in &block.primitivegroup {
        if let Some(dense) = group.dense.as_ref() {
            decode_dense_nodes(dense, conv, date_granularity, stringtable, &mut out)?;
        }
        for node in &group.nodes {
            out.push(Entity::Node(decode_node(
                node,
                conv,
                date_granularity,
                stringtable,
            )?));
        }
        for way in &group.ways {
            out.push(Entity::Way(decode_way(
                way,
                date_granularity,
                stringtable,
            )?));
        }
        for relation in &group.relations {
            out.push(Entity::Relation(decode_relation(
                relation,
                date_granularity,
                stringtable,
            )?));
        }
    }

    Ok(out)
}

/// Converts delta-scaled lat/lon integers from PBF representation into
/// degrees (§3 "Coordinate materialization").
#[derive(Clone, Copy)]
struct CoordinateConverter {
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
}

impl CoordinateConverter {
    fn from_block(block: &PrimitiveBlock) -> Self {
        Self {
            granularity: block.granularity() as i64,
            lat_offset: block.lat_offset() as i64,
            lon_offset: block.lon_offset() as i64,
        }
    }

    fn lat(&self, raw: i64) -> f64 {
        1e-9 * (self.lat_offset + self.granularity * raw) as f64
    }

    fn lon(&self, raw: i64) -> f64 {
        1e-9 * (self.lon_offset + self.granularity * raw) as f64
    }
}

fn get_string(table: &[Vec<u8>], idx: i64) -> Result<String> {
    if idx < 0 || idx as usize >= table.len() {
        return Err(Error::StringIndexOutOfRange(idx as i32));
    }
    Ok(String::from_utf8_lossy(&table[idx as usize]).into_owned())
}

fn collect_tags(keys: &[u32], vals: &[u32], stringtable: &[Vec<u8>]) -> Result<HashMap<String, String>> {
    if keys.len() != vals.len() {
        return Err(Error::LengthMismatch { field: "keys/vals" });
    }
    keys.iter()
        .zip(vals.iter())
        .map(|(&k, &v)| Ok((get_string(stringtable, k as i64)?, get_string(stringtable, v as i64)?)))
        .collect()
}

fn scan_deltas(raw: &[i64]) -> Vec<i64> {
    raw.iter()
        .scan(0i64, |acc, &d| {
            *acc += d;
            Some(*acc)
        })
        .collect()
}

fn build_info(info: &protobuf::MessageField<osmformat::Info>, date_granularity: i64, stringtable: &[Vec<u8>]) -> Result<Info> {
    match info.as_ref() {
        None => Ok(Info::unknown()),
        Some(info) => Ok(Info {
            version: info.version() as i16,
            timestamp: info.timestamp.map(|ts| ts * date_granularity),
            changeset: info.changeset() as u64,
            uid: info.uid(),
            user: if info.user_sid.is_some() {
                get_string(stringtable, info.user_sid() as i64)?
            } else {
                String::new()
            },
            visible: info.visible(),
        }),
    }
}

fn decode_node(
    node: &osmformat::Node,
    conv: CoordinateConverter,
    date_granularity: i64,
    stringtable: &[Vec<u8>],
) -> Result<Node> {
    Ok(Node {
        id: node.id(),
        lat: conv.lat(node.lat()),
        lon: conv.lon(node.lon()),
        tags: collect_tags(&node.keys, &node.vals, stringtable)?,
        info: build_info(&node.info, date_granularity, stringtable)?,
    })
}

fn decode_way(way: &osmformat::Way, date_granularity: i64, stringtable: &[Vec<u8>]) -> Result<Way> {
    Ok(Way {
        id: way.id(),
        nodes: scan_deltas(&way.refs),
        tags: collect_tags(&way.keys, &way.vals, stringtable)?,
        info: build_info(&way.info, date_granularity, stringtable)?,
    })
}

fn decode_relation(
    relation: &osmformat::Relation,
    date_granularity: i64,
    stringtable: &[Vec<u8>],
) -> Result<Relation> {
    let n = relation.memids.len();
    if relation.types.len() != n || relation.roles_sid.len() != n {
        return Err(Error::LengthMismatch {
            field: "roles_sid/memids/types",
        });
    }

    let ids = scan_deltas(&relation.memids);
    let mut members = Vec::with_capacity(n);
    for i in 0..n {
        let kind = match relation.types[i].enum_value() {
            Ok(MemberType::NODE) => MemberKind::Node,
            Ok(MemberType::WAY) => MemberKind::Way,
            Ok(MemberType::RELATION) => MemberKind::Relation,
            Err(raw) => return Err(Error::UnknownMemberType(raw)),
        };
        members.push(Member {
            id: ids[i],
            kind,
            role: get_string(stringtable, relation.roles_sid[i] as i64)?,
        });
    }

    Ok(Relation {
        id: relation.id(),
        members,
        tags: collect_tags(&relation.keys, &relation.vals, stringtable)?,
        info: build_info(&relation.info, date_granularity, stringtable)?,
    })
}

fn decode_dense_nodes(
    dense: &osmformat::DenseNodes,
    conv: CoordinateConverter,
    date_granularity: i64,
    stringtable: &[Vec<u8>],
    out: &mut Vec<Entity>,
) -> Result<()> {
    let n = dense.id.len();
    if dense.lat.len() != n || dense.lon.len() != n {
        return Err(Error::LengthMismatch { field: "dense id/lat/lon" });
    }

    let ids = scan_deltas(&dense.id);
    let lats = scan_deltas(&dense.lat);
    let lons = scan_deltas(&dense.lon);
    let infos = decode_dense_infos(dense, n, date_granularity, stringtable)?;
    let mut tags = decode_dense_tags(&dense.keys_vals, n, stringtable)?;

    for i in 0..n {
        out.push(Entity::Node(Node {
            id: ids[i],
            lat: conv.lat(lats[i]),
            lon: conv.lon(lons[i]),
            tags: std::mem::take(&mut tags[i]),
            info: infos[i].clone(),
        }));
    }

    Ok(())
}

fn decode_dense_infos(
    dense: &osmformat::DenseNodes,
    n: usize,
    date_granularity: i64,
    stringtable: &[Vec<u8>],
) -> Result<Vec<Info>> {
    let Some(info) = dense.denseinfo.as_ref() else {
        return Ok((0..n).map(|_| Info::unknown()).collect());
    };

    if info.version.len() != n
        || info.timestamp.len() != n
        || info.changeset.len() != n
        || info.uid.len() != n
        || info.user_sid.len() != n
    {
        return Err(Error::LengthMismatch {
            field: "dense info arrays",
        });
    }

    let timestamps = scan_deltas(&info.timestamp);
    let changesets = scan_deltas(&info.changeset);
    let uids = scan_deltas(&info.uid.iter().map(|&v| v as i64).collect::<Vec<_>>());
    let user_sids = scan_deltas(&info.user_sid.iter().map(|&v| v as i64).collect::<Vec<_>>());

    (0..n)
        .map(|i| {
            Ok(Info {
                version: info.version[i] as i16,
                timestamp: Some(timestamps[i] * date_granularity),
                changeset: changesets[i] as u64,
                uid: uids[i] as i32,
                user: get_string(stringtable, user_sids[i])?,
                visible: info.visible.get(i).copied().unwrap_or(true),
            })
        })
        .collect()
}

/// Splits the flat, sentinel-terminated `keys_vals` stream into one tag map
/// per node (§3, §4.3). An entirely empty stream means no node has tags; a
/// stream that runs dry mid-node (a key with no matching value, or a node
/// whose segment never reaches its terminating zero) is a
/// [Error::DenseTagStreamUnderflow].
fn decode_dense_tags(
    keys_vals: &[i32],
    n: usize,
    stringtable: &[Vec<u8>],
) -> Result<Vec<HashMap<String, String>>> {
    if keys_vals.is_empty() {
        return Ok((0..n).map(|_| HashMap::new()).collect());
    }

    let mut cursor = keys_vals.iter();
    let mut out = Vec::with_capacity(n);

    for _ in 0..n {
        let mut tags = HashMap::new();
        loop {
            let key_idx = *cursor.next().ok_or(Error::DenseTagStreamUnderflow)?;
            if key_idx == 0 {
                break;
            }
            let val_idx = *cursor.next().ok_or(Error::DenseTagStreamUnderflow)?;
            tags.insert(
                get_string(stringtable, key_idx as i64)?,
                get_string(stringtable, val_idx as i64)?,
            );
        }
        out.push(tags);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(strings: &[&str]) -> Vec<Vec<u8>> {
        strings.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn coordinate_round_trip() {
        let conv = CoordinateConverter {
            granularity: 100,
            lat_offset: 0,
            lon_offset: 0,
        };
        assert!((conv.lat(450_000_000) - 45.0).abs() < 1e-9);
        assert!((conv.lon(900_000_000) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn delta_decoding() {
        assert_eq!(scan_deltas(&[10, 5, 5, -3]), vec![10, 15, 20, 17]);
    }

    #[test]
    fn way_ref_delta_decoding() {
        assert_eq!(scan_deltas(&[100, 1, 1, -50]), vec![100, 101, 102, 52]);
    }

    #[test]
    fn dense_tag_framing() {
        let st = table(&["", "k1", "v1", "k3", "", "", "", "v3"]);
        let tags = decode_dense_tags(&[3, 7, 0, 0, 1, 2, 0], 3, &st).unwrap();
        assert_eq!(tags[0].len(), 1);
        assert_eq!(tags[0].get("k3").unwrap(), "v3");
        assert!(tags[1].is_empty());
        assert_eq!(tags[2].len(), 1);
        assert_eq!(tags[2].get("k1").unwrap(), "v1");
    }

    #[test]
    fn absent_dense_tags_means_no_tags_for_anyone() {
        let st = table(&[]);
        let tags = decode_dense_tags(&[], 5, &st).unwrap();
        assert_eq!(tags.len(), 5);
        assert!(tags.iter().all(|t| t.is_empty()));
    }

    #[test]
    fn dense_tag_underflow_is_an_error() {
        let st = table(&["", "k"]);
        // Node 0's segment never reaches its terminating zero.
        let err = decode_dense_tags(&[1], 1, &st).unwrap_err();
        assert!(matches!(err, Error::DenseTagStreamUnderflow));
    }

    #[test]
    fn out_of_range_string_index_is_fatal() {
        let st = table(&["a"]);
        let err = get_string(&st, 5).unwrap_err();
        assert!(matches!(err, Error::StringIndexOutOfRange(5)));
    }
}
