//! Generic decoder for ART bit tables.
//!
//! A bit table is a header (row count and per-column bit widths, as varints)
//! followed by `rows * row_bits` bits of row data. Rows are never materialized;
//! every lookup computes the bit offset of the requested cell.

use std::ops::Range;

use log::trace;

use crate::art::bit_memory::BitSpan;
use crate::art::bit_reader::BitCursor;
use crate::art::error::{ArtError, ErrorKind};
use crate::art::version::TableEncoding;

/// Decoded value of an absent field.
pub const NO_VALUE: u32 = u32::MAX;
/// Added (mod 2^32) to every stored field, so that a stored 0 reads as [`NO_VALUE`].
pub const VALUE_BIAS: u32 = NO_VALUE;

#[derive(Clone, PartialEq, Eq)]
pub struct BitTable<'a> {
    num_rows: u32,
    column_offsets: Vec<u16>,
    data: BitSpan<'a>,
}

impl<'a> BitTable<'a> {
    /// An absent table with `num_columns` zero-width columns.
    pub fn empty(num_columns: usize) -> BitTable<'static> {
        BitTable { num_rows: 0, column_offsets: vec![0; num_columns + 1], data: BitSpan::empty() }
    }

    /// Decodes the header and claims the row data from `cursor`.
    pub fn decode(cursor: &mut BitCursor<'a>, num_columns: usize, encoding: TableEncoding) -> Result<BitTable<'a>, ArtError> {
        let mut widths = vec![0u32; num_columns];
        let num_rows = match encoding {
            TableEncoding::Interleaved => {
                let header = cursor.read_interleaved_varints(num_columns + 1)?;
                widths.copy_from_slice(&header[1..]);
                header[0]
            }
            TableEncoding::Sequential => {
                let num_rows = cursor.read_varint()?;
                if num_rows != 0 {
                    for width in widths.iter_mut() {
                        *width = cursor.read_varint()?;
                    }
                }
                num_rows
            }
        };

        let mut column_offsets = Vec::with_capacity(num_columns + 1);
        column_offsets.push(0u16);
        let mut total = 0u32;
        for (column, width) in widths.iter().enumerate() {
            total = total.saturating_add(*width);
            if total > u16::MAX as u32 {
                fail!(Format, "bit table row width {} overflows 16 bits at column {}", total, column);
            }
            column_offsets.push(total as u16);
        }

        let data_bits = (num_rows as usize).checked_mul(total as usize);
        let data = match data_bits {
            Some(bits) => cursor.read_region(bits)?,
            None => fail!(Format, "bit table of {} rows x {} bits is too large", num_rows, total),
        };
        trace!("bit table: {} rows, {} columns, {} bits per row", num_rows, num_columns, total);

        Ok(BitTable { num_rows, column_offsets, data })
    }

    pub fn is_valid(&self) -> bool {
        self.num_rows > 0
    }

    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.column_offsets.len() - 1
    }

    pub fn num_row_bits(&self) -> usize {
        *self.column_offsets.last().unwrap_or(&0) as usize
    }

    /// Width of `column` in bits, 0 for a column that does not exist.
    pub fn column_width(&self, column: usize) -> usize {
        if column >= self.num_columns() {
            return 0;
        }
        (self.column_offsets[column + 1] - self.column_offsets[column]) as usize
    }

    pub fn column_offsets(&self) -> &[u16] {
        &self.column_offsets
    }

    /// Row data size in bits.
    pub fn data_bit_size(&self) -> usize {
        self.data.size_in_bits()
    }

    pub fn data(&self) -> BitSpan<'a> {
        self.data
    }

    fn cell_offset(&self, row: u32, column: usize) -> usize {
        row as usize * self.num_row_bits() + self.column_offsets[column] as usize
    }

    /// The biased value at `(row, column)`, or [`NO_VALUE`] outside the table.
    #[inline]
    pub fn get(&self, row: u32, column: usize) -> u32 {
        if row >= self.num_rows || column >= self.num_columns() {
            return NO_VALUE;
        }
        // Bitmap columns may be wider than a value; only the low 32 bits are kept.
        let width = self.column_width(column).min(32);
        let raw = self.data.load_bits_unchecked(self.cell_offset(row, column), width);
        (raw as u32).wrapping_add(VALUE_BIAS)
    }

    /// Like [`BitTable::get`] but reports an out-of-range access.
    pub fn try_get(&self, row: u32, column: usize) -> Result<u32, ArtError> {
        if row >= self.num_rows || column >= self.num_columns() {
            fail!(
                Format,
                "bit table cell ({}, {}) outside {} rows x {} columns",
                row,
                column,
                self.num_rows,
                self.num_columns()
            );
        }
        Ok(self.get(row, column))
    }

    /// Raw bits of one cell. Bitmap tables (stack masks, dex register masks) are
    /// read this way.
    pub fn bit_region(&self, row: u32, column: usize) -> Result<BitSpan<'a>, ArtError> {
        if row >= self.num_rows || column >= self.num_columns() {
            fail!(Format, "bit table cell ({}, {}) outside {} rows", row, column, self.num_rows);
        }
        self.data.subspan(self.cell_offset(row, column), self.column_width(column))
    }

    /// Set bits over all row data.
    pub fn pop_count(&self) -> u32 {
        if !self.is_valid() {
            return 0;
        }
        self.data.pop_count_all()
    }

    /// Set bits over the rows in `rows`.
    pub fn pop_count_rows(&self, rows: Range<u32>) -> Result<u32, ArtError> {
        if rows.is_empty() || !self.is_valid() {
            return Ok(0);
        }
        if rows.end > self.num_rows {
            fail!(Format, "row range {:?} outside {} rows", rows, self.num_rows);
        }
        let row_bits = self.num_row_bits();
        self.data.pop_count(rows.start as usize * row_bits, (rows.end - rows.start) as usize * row_bits)
    }
}

/// Cell value for `Debug` output: [`NO_VALUE`] prints as -1, anything else unsigned.
#[doc(hidden)]
pub fn debug_value(value: u32) -> i64 {
    if value == NO_VALUE {
        -1
    } else {
        value as i64
    }
}

impl std::fmt::Debug for BitTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitTable[{} rows, columns {:?}]", self.num_rows, self.column_offsets)
    }
}

/// Declares a typed row view over a [`BitTable`], one getter per column.
///
/// ```ignore
/// bit_table_accessor! {
///     /// Doc for the row type.
///     pub struct RegisterMask {
///         0 => value / has_value,
///         1 => shift / has_shift,
///     }
/// }
/// ```
#[macro_export]
macro_rules! bit_table_accessor {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($column:literal => $getter:ident / $has:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name<'t, 'a> {
            table: &'t $crate::art::bit_table::BitTable<'a>,
            row: u32,
        }

        impl<'t, 'a> $name<'t, 'a> {
            pub fn new(table: &'t $crate::art::bit_table::BitTable<'a>, row: u32) -> Self {
                $name { table, row }
            }

            pub fn row(&self) -> u32 {
                self.row
            }

            pub fn table(&self) -> &'t $crate::art::bit_table::BitTable<'a> {
                self.table
            }

            pub fn is_valid(&self) -> bool {
                self.row < self.table.num_rows()
            }

            $(
                pub fn $getter(&self) -> u32 {
                    self.table.get(self.row, $column)
                }

                pub fn $has(&self) -> bool {
                    self.$getter() != $crate::art::bit_table::NO_VALUE
                }
            )*
        }

        impl std::fmt::Debug for $name<'_, '_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                s.field("row", &self.row);
                $( s.field(stringify!($getter), &$crate::art::bit_table::debug_value(self.$getter())); )*
                s.finish()
            }
        }
    };
}
