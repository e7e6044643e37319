use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::cursor::{self, string_size, BinaryCursor};
use crate::eum::{Unit, ValueType};
use crate::errors::{Error, Result};

/// Definition of one field stored in a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Name of the item, e.g. "Water Level"
    pub name: String,

    #[serde(default)]
    pub unit: Unit,

    /// How values are stored on disk
    #[serde(default)]
    pub value_type: ValueType,
}

impl ItemDefinition {
    pub fn new<S: Into<String>>(name: S, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
            value_type: ValueType::Float32,
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

impl cursor::Serialize for ItemDefinition {
    fn write_to(&self, cursor: &mut BinaryCursor<impl Write>) -> Result<()> {
        cursor.write_string(&self.name)?;
        cursor.write_u16(self.unit.code())?;
        cursor.write_u8(self.value_type.code())?;

        Ok(())
    }

    fn read_from(cursor: &mut BinaryCursor<impl Read>) -> Result<Self> {
        let name = cursor.read_string()?;
        let unit = Unit::from_code(cursor.read_u16()?);
        let offset = cursor.position();
        let code = cursor.read_u8()?;
        let value_type = ValueType::from_code(code).ok_or_else(|| Error::CorruptHeader {
            offset,
            reason: format!("unknown value type code {code} for item {name:?}"),
        })?;

        Ok(Self {
            name,
            unit,
            value_type,
        })
    }

    fn size(&self) -> u64 {
        string_size(&self.name) + 2 + 1
    }
}
