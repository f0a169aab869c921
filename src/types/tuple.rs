//! Records stored in B+Tree leaves and the field comparison contract.

use crate::error::{Result, StorageError};
use crate::types::PageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of an integer field on disk
pub const INT_FIELD_SIZE: usize = 4;

/// Comparison operators understood by fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEq,
    LessThanOrEq,
}

/// A fixed-width integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntField(pub i32);

impl IntField {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    /// Evaluate `self <op> other`
    pub fn compare(&self, op: Op, other: &IntField) -> bool {
        match op {
            Op::Equals => self == other,
            Op::NotEquals => self != other,
            Op::GreaterThan => self > other,
            Op::LessThan => self < other,
            Op::GreaterThanOrEq => self >= other,
            Op::LessThanOrEq => self <= other,
        }
    }

    pub fn to_bytes(self) -> [u8; INT_FIELD_SIZE] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for IntField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for IntField {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

/// Shape of the records of a table: a number of integer columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleDesc {
    num_fields: usize,
}

impl TupleDesc {
    pub fn new(num_fields: usize) -> Self {
        Self { num_fields }
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    /// Encoded size of one record in bytes
    pub fn size(&self) -> usize {
        self.num_fields * INT_FIELD_SIZE
    }
}

/// Location a tuple was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

/// A record
#[derive(Debug, Clone)]
pub struct Tuple {
    fields: Vec<IntField>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<IntField>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    /// Build a tuple from raw integers
    pub fn from_values(values: &[i32]) -> Self {
        Self::new(values.iter().copied().map(IntField).collect())
    }

    pub fn field(&self, index: usize) -> IntField {
        self.fields[index]
    }

    pub fn fields(&self) -> &[IntField] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Check the tuple matches a table's shape
    pub fn check_desc(&self, desc: &TupleDesc) -> Result<()> {
        if self.fields.len() != desc.num_fields() {
            return Err(StorageError::invalid_operation(format!(
                "tuple has {} fields, table expects {}",
                self.fields.len(),
                desc.num_fields()
            )));
        }
        Ok(())
    }

    pub fn encode_into(&self, out: &mut [u8]) {
        for (i, field) in self.fields.iter().enumerate() {
            let at = i * INT_FIELD_SIZE;
            out[at..at + INT_FIELD_SIZE].copy_from_slice(&field.to_bytes());
        }
    }

    pub fn decode(desc: &TupleDesc, bytes: &[u8]) -> Self {
        let fields = (0..desc.num_fields())
            .map(|i| IntField::from_bytes(&bytes[i * INT_FIELD_SIZE..]))
            .collect();
        Self::new(fields)
    }
}

/// Tuples compare by content; the record id is only a location hint
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
