//! Hand-written wire-format implementations for the data model.
//!
//! Enum kinds use one-byte tags; everything else composes the primitive
//! encodings. Changing any of these is an on-disk format change.

use std::collections::BTreeMap;

use crate::data::cells::{Cell, ColumnId, DeletionTime, Row};
use crate::data::clustering::{Clustering, ClusteringKind};
use crate::data::update::{Mutation, PartitionUpdate, RangeTombstone};
use crate::data::{DecoratedKey, TableId, Token};
use crate::encoding::{self, Decode, Encode, EncodingError};

impl Encode for TableId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for TableId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (id, n) = u64::decode_from(buf)?;
        Ok((TableId(id), n))
    }
}

impl Encode for Token {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Token {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (token, n) = i64::decode_from(buf)?;
        Ok((Token(token), n))
    }
}

impl Encode for DecoratedKey {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.token.encode_to(buf)?;
        self.key.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DecoratedKey {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (token, n) = Token::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((DecoratedKey { token, key }, offset))
    }
}

impl ClusteringKind {
    fn tag(self) -> u8 {
        match self {
            ClusteringKind::StaticRow => 0,
            ClusteringKind::Row => 1,
            ClusteringKind::InclStart => 2,
            ClusteringKind::ExclStart => 3,
            ClusteringKind::InclEnd => 4,
            ClusteringKind::ExclEnd => 5,
            ClusteringKind::InclEndExclStartBoundary => 6,
            ClusteringKind::ExclEndInclStartBoundary => 7,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, EncodingError> {
        Ok(match tag {
            0 => ClusteringKind::StaticRow,
            1 => ClusteringKind::Row,
            2 => ClusteringKind::InclStart,
            3 => ClusteringKind::ExclStart,
            4 => ClusteringKind::InclEnd,
            5 => ClusteringKind::ExclEnd,
            6 => ClusteringKind::InclEndExclStartBoundary,
            7 => ClusteringKind::ExclEndInclStartBoundary,
            tag => {
                return Err(EncodingError::InvalidTag {
                    tag,
                    type_name: "ClusteringKind",
                });
            }
        })
    }
}

impl Encode for Clustering {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.kind.tag().encode_to(buf)?;
        encoding::encode_vec(&self.values, buf)?;
        Ok(())
    }
}

impl Decode for Clustering {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let kind = ClusteringKind::from_tag(tag)?;
        let (values, n) = encoding::decode_vec::<Vec<u8>>(&buf[offset..])?;
        offset += n;
        Ok((Clustering { kind, values }, offset))
    }
}

impl Encode for DeletionTime {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.marked_for_delete_at.encode_to(buf)?;
        self.local_deletion_time.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DeletionTime {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (marked_for_delete_at, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (local_deletion_time, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            DeletionTime {
                marked_for_delete_at,
                local_deletion_time,
            },
            offset,
        ))
    }
}

impl Encode for Cell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.timestamp.encode_to(buf)?;
        self.local_deletion_time.encode_to(buf)?;
        self.value.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Cell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (local_deletion_time, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Cell {
                timestamp,
                local_deletion_time,
                value,
            },
            offset,
        ))
    }
}

/// Helper pair for encoding the cell map.
struct ColumnCell(ColumnId, Cell);

impl Encode for ColumnCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)?;
        self.1.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ColumnCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (column, n) = ColumnId::decode_from(&buf[offset..])?;
        offset += n;
        let (cell, n) = Cell::decode_from(&buf[offset..])?;
        offset += n;
        Ok((ColumnCell(column, cell), offset))
    }
}

impl Encode for Row {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.clustering.encode_to(buf)?;
        self.deletion.encode_to(buf)?;
        let cells: Vec<ColumnCell> = self
            .cells
            .iter()
            .map(|(column, cell)| ColumnCell(*column, cell.clone()))
            .collect();
        encoding::encode_vec(&cells, buf)?;
        Ok(())
    }
}

impl Decode for Row {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (clustering, n) = Clustering::decode_from(&buf[offset..])?;
        offset += n;
        let (deletion, n) = DeletionTime::decode_from(&buf[offset..])?;
        offset += n;
        let (cells, n) = encoding::decode_vec::<ColumnCell>(&buf[offset..])?;
        offset += n;
        Ok((
            Row {
                clustering,
                deletion,
                cells: cells.into_iter().map(|c| (c.0, c.1)).collect(),
            },
            offset,
        ))
    }
}

impl Encode for RangeTombstone {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        self.deletion.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for RangeTombstone {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (start, n) = Clustering::decode_from(&buf[offset..])?;
        offset += n;
        let (end, n) = Clustering::decode_from(&buf[offset..])?;
        offset += n;
        let (deletion, n) = DeletionTime::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            RangeTombstone {
                start,
                end,
                deletion,
            },
            offset,
        ))
    }
}

impl Encode for PartitionUpdate {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.table_id.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.partition_deletion.encode_to(buf)?;
        self.static_row.encode_to(buf)?;
        encoding::encode_vec(&self.range_tombstones, buf)?;
        let rows: Vec<Row> = self.rows.values().cloned().collect();
        encoding::encode_vec(&rows, buf)?;
        self.cdc.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for PartitionUpdate {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (table_id, n) = TableId::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (partition_deletion, n) = DeletionTime::decode_from(&buf[offset..])?;
        offset += n;
        let (static_row, n) = Option::<Row>::decode_from(&buf[offset..])?;
        offset += n;
        let (range_tombstones, n) = encoding::decode_vec::<RangeTombstone>(&buf[offset..])?;
        offset += n;
        let (rows, n) = encoding::decode_vec::<Row>(&buf[offset..])?;
        offset += n;
        let (cdc, n) = bool::decode_from(&buf[offset..])?;
        offset += n;

        let rows: BTreeMap<Clustering, Row> = rows
            .into_iter()
            .map(|row| (row.clustering.clone(), row))
            .collect();

        Ok((
            PartitionUpdate {
                table_id,
                key,
                partition_deletion,
                static_row,
                range_tombstones,
                rows,
                cdc,
            },
            offset,
        ))
    }
}

impl Encode for Mutation {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.keyspace.encode_to(buf)?;
        self.key.encode_to(buf)?;
        let updates: Vec<PartitionUpdate> = self.updates.values().cloned().collect();
        encoding::encode_vec(&updates, buf)?;
        Ok(())
    }
}

impl Decode for Mutation {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (keyspace, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (updates, n) = encoding::decode_vec::<PartitionUpdate>(&buf[offset..])?;
        offset += n;
        Ok((
            Mutation {
                keyspace,
                key,
                updates: updates.into_iter().map(|u| (u.table_id, u)).collect(),
            },
            offset,
        ))
    }
}
