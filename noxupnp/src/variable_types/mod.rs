//! # Types de données UPnP
//!
//! Ce module définit le vocabulaire de types de la UPnP Device Architecture
//! et les valeurs typées correspondantes.
//!
//! ## Fonctionnalités
//!
//! - ✅ Les 23 types de données UDA ([`StateVarType`])
//! - ✅ Valeurs typées ([`StateValue`]) avec parsing et sérialisation texte
//! - ✅ Coercion depuis les payloads GENA/SOAP vers le type déclaré

mod errors;

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

pub use errors::StateValueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateVarType {
    UI1,        // Unsigned 8-bit integer
    UI2,        // Unsigned 16-bit integer
    UI4,        // Unsigned 32-bit integer
    I1,         // Signed 8-bit integer
    I2,         // Signed 16-bit integer
    I4,         // Signed 32-bit integer
    Int,        // Synonymous with i4
    R4,         // 32-bit floating point
    R8,         // 64-bit floating point
    Number,     // Synonymous with r8
    Fixed14_4,  // Fixed-point decimal
    Char,       // Single Unicode character
    String,     // Character string
    Boolean,    // Boolean value
    BinBase64,  // Base64-encoded binary
    BinHex,     // Hex-encoded binary
    Date,       // Date (YYYY-MM-DD)
    DateTime,   // DateTime without timezone
    DateTimeTZ, // DateTime with timezone
    Time,       // Time without timezone
    TimeTZ,     // Time with timezone
    UUID,       // Universally unique identifier
    URI,        // Uniform Resource Identifier
}

impl StateVarType {
    /// Nom UDA du type, tel qu'il apparaît dans un document SCPD.
    pub fn upnp_name(&self) -> &'static str {
        match self {
            StateVarType::UI1 => "ui1",
            StateVarType::UI2 => "ui2",
            StateVarType::UI4 => "ui4",
            StateVarType::I1 => "i1",
            StateVarType::I2 => "i2",
            StateVarType::I4 => "i4",
            StateVarType::Int => "int",
            StateVarType::R4 => "r4",
            StateVarType::R8 => "r8",
            StateVarType::Number => "number",
            StateVarType::Fixed14_4 => "fixed.14.4",
            StateVarType::Char => "char",
            StateVarType::String => "string",
            StateVarType::Boolean => "boolean",
            StateVarType::BinBase64 => "bin.base64",
            StateVarType::BinHex => "bin.hex",
            StateVarType::Date => "date",
            StateVarType::DateTime => "dateTime",
            StateVarType::DateTimeTZ => "dateTime.tz",
            StateVarType::Time => "time",
            StateVarType::TimeTZ => "time.tz",
            StateVarType::UUID => "uuid",
            StateVarType::URI => "uri",
        }
    }

    /// Résout un nom UDA vers le type correspondant.
    pub fn from_upnp_name(name: &str) -> Option<Self> {
        let ty = match name {
            "ui1" => StateVarType::UI1,
            "ui2" => StateVarType::UI2,
            "ui4" => StateVarType::UI4,
            "i1" => StateVarType::I1,
            "i2" => StateVarType::I2,
            "i4" => StateVarType::I4,
            "int" => StateVarType::Int,
            "r4" => StateVarType::R4,
            "r8" => StateVarType::R8,
            "number" => StateVarType::Number,
            "fixed.14.4" => StateVarType::Fixed14_4,
            "char" => StateVarType::Char,
            "string" => StateVarType::String,
            "boolean" => StateVarType::Boolean,
            "bin.base64" => StateVarType::BinBase64,
            "bin.hex" => StateVarType::BinHex,
            "date" => StateVarType::Date,
            "dateTime" => StateVarType::DateTime,
            "dateTime.tz" => StateVarType::DateTimeTZ,
            "time" => StateVarType::Time,
            "time.tz" => StateVarType::TimeTZ,
            "uuid" => StateVarType::UUID,
            "uri" => StateVarType::URI,
            _ => return None,
        };
        Some(ty)
    }

    /// Vrai pour les types numériques (entiers et flottants).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            StateVarType::UI1
                | StateVarType::UI2
                | StateVarType::UI4
                | StateVarType::I1
                | StateVarType::I2
                | StateVarType::I4
                | StateVarType::Int
                | StateVarType::R4
                | StateVarType::R8
                | StateVarType::Number
                | StateVarType::Fixed14_4
        )
    }
}

/// Valeur typée d'une variable d'état.
#[derive(Clone, Debug)]
pub enum StateValue {
    UI1(u8),
    UI2(u16),
    UI4(u32),
    I1(i8),
    I2(i16),
    I4(i32),
    Int(i32),
    R4(f32),
    R8(f64),
    Number(f64),
    Fixed14_4(f64),
    Char(char),
    String(String),
    Boolean(bool),
    BinBase64(String),
    BinHex(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTZ(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTZ(DateTime<FixedOffset>),
    UUID(Uuid),
    URI(Url),
}

impl StateValue {
    /// Type UDA de cette valeur.
    pub fn data_type(&self) -> StateVarType {
        match self {
            StateValue::UI1(_) => StateVarType::UI1,
            StateValue::UI2(_) => StateVarType::UI2,
            StateValue::UI4(_) => StateVarType::UI4,
            StateValue::I1(_) => StateVarType::I1,
            StateValue::I2(_) => StateVarType::I2,
            StateValue::I4(_) => StateVarType::I4,
            StateValue::Int(_) => StateVarType::Int,
            StateValue::R4(_) => StateVarType::R4,
            StateValue::R8(_) => StateVarType::R8,
            StateValue::Number(_) => StateVarType::Number,
            StateValue::Fixed14_4(_) => StateVarType::Fixed14_4,
            StateValue::Char(_) => StateVarType::Char,
            StateValue::String(_) => StateVarType::String,
            StateValue::Boolean(_) => StateVarType::Boolean,
            StateValue::BinBase64(_) => StateVarType::BinBase64,
            StateValue::BinHex(_) => StateVarType::BinHex,
            StateValue::Date(_) => StateVarType::Date,
            StateValue::DateTime(_) => StateVarType::DateTime,
            StateValue::DateTimeTZ(_) => StateVarType::DateTimeTZ,
            StateValue::Time(_) => StateVarType::Time,
            StateValue::TimeTZ(_) => StateVarType::TimeTZ,
            StateValue::UUID(_) => StateVarType::UUID,
            StateValue::URI(_) => StateVarType::URI,
        }
    }

    /// Parse une valeur texte (payload SOAP ou GENA) vers le type déclaré.
    ///
    /// Les booléens acceptent les formes UDA : `0`/`1`, `true`/`false`,
    /// `yes`/`no` (insensible à la casse).
    pub fn parse(value_type: StateVarType, raw: &str) -> Result<Self, StateValueError> {
        let raw = raw.trim();
        let bad = || StateValueError::ParseFailed {
            value_type,
            raw: raw.to_string(),
        };

        let value = match value_type {
            StateVarType::UI1 => StateValue::UI1(raw.parse().map_err(|_| bad())?),
            StateVarType::UI2 => StateValue::UI2(raw.parse().map_err(|_| bad())?),
            StateVarType::UI4 => StateValue::UI4(raw.parse().map_err(|_| bad())?),
            StateVarType::I1 => StateValue::I1(raw.parse().map_err(|_| bad())?),
            StateVarType::I2 => StateValue::I2(raw.parse().map_err(|_| bad())?),
            StateVarType::I4 => StateValue::I4(raw.parse().map_err(|_| bad())?),
            StateVarType::Int => StateValue::Int(raw.parse().map_err(|_| bad())?),
            StateVarType::R4 => StateValue::R4(raw.parse().map_err(|_| bad())?),
            StateVarType::R8 => StateValue::R8(raw.parse().map_err(|_| bad())?),
            StateVarType::Number => StateValue::Number(raw.parse().map_err(|_| bad())?),
            StateVarType::Fixed14_4 => StateValue::Fixed14_4(raw.parse().map_err(|_| bad())?),
            StateVarType::Char => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => StateValue::Char(c),
                    _ => return Err(bad()),
                }
            }
            StateVarType::String => StateValue::String(raw.to_string()),
            StateVarType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => StateValue::Boolean(true),
                "0" | "false" | "no" => StateValue::Boolean(false),
                _ => return Err(bad()),
            },
            StateVarType::BinBase64 => StateValue::BinBase64(raw.to_string()),
            StateVarType::BinHex => {
                if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(bad());
                }
                StateValue::BinHex(raw.to_string())
            }
            StateVarType::Date => {
                StateValue::Date(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| bad())?)
            }
            StateVarType::DateTime => StateValue::DateTime(
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map_err(|_| bad())?,
            ),
            StateVarType::DateTimeTZ => {
                StateValue::DateTimeTZ(DateTime::parse_from_rfc3339(raw).map_err(|_| bad())?)
            }
            StateVarType::Time => {
                StateValue::Time(NaiveTime::parse_from_str(raw, "%H:%M:%S").map_err(|_| bad())?)
            }
            StateVarType::TimeTZ => {
                StateValue::TimeTZ(DateTime::parse_from_rfc3339(raw).map_err(|_| bad())?)
            }
            StateVarType::UUID => StateValue::UUID(raw.parse().map_err(|_| bad())?),
            StateVarType::URI => StateValue::URI(raw.parse().map_err(|_| bad())?),
        };

        Ok(value)
    }

    /// Sérialise la valeur sous sa forme texte UPnP.
    pub fn to_upnp_string(&self) -> String {
        match self {
            StateValue::UI1(v) => v.to_string(),
            StateValue::UI2(v) => v.to_string(),
            StateValue::UI4(v) => v.to_string(),
            StateValue::I1(v) => v.to_string(),
            StateValue::I2(v) => v.to_string(),
            StateValue::I4(v) => v.to_string(),
            StateValue::Int(v) => v.to_string(),
            StateValue::R4(v) => v.to_string(),
            StateValue::R8(v) => v.to_string(),
            StateValue::Number(v) => v.to_string(),
            StateValue::Fixed14_4(v) => format!("{:.4}", v),
            StateValue::Char(v) => v.to_string(),
            StateValue::String(v) => v.clone(),
            StateValue::Boolean(v) => if *v { "1" } else { "0" }.to_string(),
            StateValue::BinBase64(v) => v.clone(),
            StateValue::BinHex(v) => v.clone(),
            StateValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            StateValue::DateTime(v) => v.format("%Y-%m-%dT%H:%M:%S").to_string(),
            StateValue::DateTimeTZ(v) => v.to_rfc3339(),
            StateValue::Time(v) => v.format("%H:%M:%S").to_string(),
            StateValue::TimeTZ(v) => v.to_rfc3339(),
            StateValue::UUID(v) => v.to_string(),
            StateValue::URI(v) => v.to_string(),
        }
    }

    /// Valeur numérique pour les vérifications de plage.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::UI1(v) => Some(f64::from(*v)),
            StateValue::UI2(v) => Some(f64::from(*v)),
            StateValue::UI4(v) => Some(f64::from(*v)),
            StateValue::I1(v) => Some(f64::from(*v)),
            StateValue::I2(v) => Some(f64::from(*v)),
            StateValue::I4(v) => Some(f64::from(*v)),
            StateValue::Int(v) => Some(f64::from(*v)),
            StateValue::R4(v) => Some(f64::from(*v)),
            StateValue::R8(v) => Some(*v),
            StateValue::Number(v) => Some(*v),
            StateValue::Fixed14_4(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_upnp_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_types() {
        assert!(matches!(
            StateValue::parse(StateVarType::UI4, "42").unwrap(),
            StateValue::UI4(42)
        ));
        assert!(matches!(
            StateValue::parse(StateVarType::I2, "-3").unwrap(),
            StateValue::I2(-3)
        ));
        assert!(StateValue::parse(StateVarType::UI1, "300").is_err());
        assert!(StateValue::parse(StateVarType::I4, "abc").is_err());
    }

    #[test]
    fn test_parse_boolean_forms() {
        for raw in ["1", "true", "Yes", "TRUE"] {
            assert!(matches!(
                StateValue::parse(StateVarType::Boolean, raw).unwrap(),
                StateValue::Boolean(true)
            ));
        }
        for raw in ["0", "false", "no"] {
            assert!(matches!(
                StateValue::parse(StateVarType::Boolean, raw).unwrap(),
                StateValue::Boolean(false)
            ));
        }
        assert!(StateValue::parse(StateVarType::Boolean, "maybe").is_err());
    }

    #[test]
    fn test_roundtrip_text_forms() {
        let cases = [
            (StateVarType::UI4, "17"),
            (StateVarType::Boolean, "1"),
            (StateVarType::String, "hello world"),
            (StateVarType::Date, "2024-03-01"),
            (StateVarType::Time, "12:30:05"),
            (StateVarType::UUID, "6ba7b810-9dad-11d1-80b4-00c04fd430c8"),
        ];
        for (ty, raw) in cases {
            let value = StateValue::parse(ty, raw).unwrap();
            assert_eq!(value.to_upnp_string(), raw);
        }
    }

    #[test]
    fn test_type_names_roundtrip() {
        for name in ["ui1", "i4", "fixed.14.4", "bin.base64", "dateTime.tz", "uri"] {
            let ty = StateVarType::from_upnp_name(name).unwrap();
            assert_eq!(ty.upnp_name(), name);
        }
        assert!(StateVarType::from_upnp_name("float128").is_none());
    }

    #[test]
    fn test_binhex_rejects_non_hex() {
        assert!(StateValue::parse(StateVarType::BinHex, "deadbeef").is_ok());
        assert!(StateValue::parse(StateVarType::BinHex, "zz").is_err());
    }
}
