// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Column descriptors and the fixed-width row layout they define.

use crate::{ZfitsResult, codec::Compression, error::Details};
use strum_macros::EnumIter;

/// Element type of a column, named after the FITS `TFORM` letters it maps to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, EnumIter)]
pub enum ColumnType {
    /// `L`, 1-byte logical.
    Bool,
    /// `A`, 1-byte character.
    Char,
    /// `B`, unsigned byte.
    Byte,
    /// `I`, 2-byte integer.
    Short,
    /// `J`, 4-byte integer.
    Int,
    /// `K`, 8-byte integer.
    Long,
    /// `E`, 4-byte float.
    Float,
    /// `D`, 8-byte float.
    Double,
}

impl ColumnType {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            ColumnType::Bool | ColumnType::Char | ColumnType::Byte => 1,
            ColumnType::Short => 2,
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::Long | ColumnType::Double => 8,
        }
    }

    pub fn letter(self) -> char {
        match self {
            ColumnType::Bool => 'L',
            ColumnType::Char => 'A',
            ColumnType::Byte => 'B',
            ColumnType::Short => 'I',
            ColumnType::Int => 'J',
            ColumnType::Long => 'K',
            ColumnType::Float => 'E',
            ColumnType::Double => 'D',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'L' => Some(ColumnType::Bool),
            'A' => Some(ColumnType::Char),
            'B' => Some(ColumnType::Byte),
            'I' => Some(ColumnType::Short),
            'J' => Some(ColumnType::Int),
            'K' => Some(ColumnType::Long),
            'E' => Some(ColumnType::Float),
            'D' => Some(ColumnType::Double),
            _ => None,
        }
    }
}

/// How a column's values are laid out inside a tile before compression.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RowOrdering {
    /// Every row's elements stay contiguous.
    ByRow,
    /// Element index outermost, rows innermost: one sample stream per element.
    #[default]
    ByColumn,
}

impl RowOrdering {
    pub fn to_byte(self) -> u8 {
        match self {
            RowOrdering::ByRow => b'R',
            RowOrdering::ByColumn => b'C',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'R' => Some(RowOrdering::ByRow),
            b'C' => Some(RowOrdering::ByColumn),
            _ => None,
        }
    }
}

/// Static metadata of one table column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    /// Number of elements per row.
    pub count: usize,
    /// Byte offset of the column inside a row.
    pub offset: usize,
    pub compression: Compression,
}

impl ColumnDescriptor {
    /// Number of bytes the column occupies in one row.
    pub fn width(&self) -> usize {
        self.column_type.size() * self.count
    }

    /// The `ZFORMn` value, e.g. `8I`.
    pub fn format(&self) -> String {
        format!("{}{}", self.count, self.column_type.letter())
    }
}

/// The ordered columns of a table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<ColumnDescriptor>,
    row_width: usize,
}

impl TableSchema {
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column at the end of the row. The schema is unchanged on error.
    pub fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        count: usize,
        compression: Compression,
    ) -> ZfitsResult<&ColumnDescriptor> {
        if self.column(name).is_some() {
            return Err(Details::DuplicateColumn(name.to_string()).into());
        }
        if let Err(reason) = compression.validate(column_type) {
            return Err(Details::InvalidCompression {
                column: name.to_string(),
                column_type,
                sequence: compression.sequence().to_vec(),
                reason,
            }
            .into());
        }

        let column = ColumnDescriptor {
            name: name.to_string(),
            column_type,
            count,
            offset: self.row_width,
            compression,
        };
        self.row_width += column.width();
        self.columns.push(column);
        Ok(&self.columns[self.columns.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn letters_round_trip() {
        for column_type in ColumnType::iter() {
            assert_eq!(ColumnType::from_letter(column_type.letter()), Some(column_type));
        }
        assert_eq!(ColumnType::from_letter('Q'), None);
    }

    #[test]
    fn columns_are_laid_out_back_to_back() {
        let mut schema = TableSchema::default();
        schema
            .add_column("EventNum", ColumnType::Int, 1, Compression::raw())
            .unwrap();
        schema
            .add_column("Data", ColumnType::Short, 1440, Compression::smoothed_huffman())
            .unwrap();
        schema
            .add_column("Time", ColumnType::Double, 2, Compression::raw())
            .unwrap();

        let offsets: Vec<_> = schema.columns().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 4, 2884]);
        assert_eq!(schema.row_width(), 2900);
        assert_eq!(schema.column("Data").unwrap().format(), "1440I");
    }

    #[test]
    fn rejected_columns_leave_the_schema_untouched() {
        let mut schema = TableSchema::default();
        schema
            .add_column("A", ColumnType::Short, 2, Compression::raw())
            .unwrap();
        let before = schema.clone();

        assert!(
            schema
                .add_column("A", ColumnType::Int, 1, Compression::raw())
                .is_err()
        );
        assert!(
            schema
                .add_column(
                    "B",
                    ColumnType::Char,
                    4,
                    Compression::new(vec![Codec::Huffman16], RowOrdering::ByColumn)
                )
                .is_err()
        );
        assert_eq!(schema, before);
    }

    #[test]
    fn process_count_must_fit_the_block_header() {
        let mut schema = TableSchema::default();
        let mut sequence = vec![Codec::Smoothing; 255];
        sequence.push(Codec::Huffman16);
        let err = schema
            .add_column(
                "Data",
                ColumnType::Short,
                100,
                Compression::new(sequence, RowOrdering::ByColumn),
            )
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err.details(),
            Details::InvalidCompression { sequence, .. } if sequence.len() == 256
        ));
        assert!(schema.is_empty());
    }
}
