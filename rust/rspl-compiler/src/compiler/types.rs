//! Data types, registers and vector lane selectors of the RSP target.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Primitive data types of the language.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    /// Eight 16-bit lanes in one vector register.
    Vec16,
    /// Eight 16.16 lanes: integer part in register N, fraction in N+1.
    Vec32,
}

impl DataType {
    pub fn byte_size(self) -> u32 {
        match self {
            DataType::U8 | DataType::S8 => 1,
            DataType::U16 | DataType::S16 => 2,
            DataType::U32 | DataType::S32 => 4,
            DataType::Vec16 => 16,
            DataType::Vec32 => 32,
        }
    }

    /// Natural alignment in bytes (always a power of two).
    pub fn alignment(self) -> u32 {
        match self {
            DataType::Vec16 | DataType::Vec32 => 16,
            other => other.byte_size(),
        }
    }

    pub fn reg_count(self) -> u8 {
        match self {
            DataType::Vec32 => 2,
            _ => 1,
        }
    }

    pub fn is_signed(self) -> bool {
        match self {
            DataType::S8 | DataType::S16 | DataType::S32 => true,
            DataType::U8 | DataType::U16 | DataType::U32 => false,
            DataType::Vec16 | DataType::Vec32 => true,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, DataType::Vec16 | DataType::Vec32)
    }
}

/// Names of the 32 scalar registers, indexed by register number.
pub const SCALAR_REG_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1", "$t2", "$t3", "$t4",
    "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7", "$t8", "$t9",
    "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

/// A hardware register, scalar (`$t0`) or vector (`$v04`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Reg {
    Scalar(u8),
    Vector(u8),
}

impl Reg {
    pub const ZERO: Reg = Reg::Scalar(0);
    pub const AT: Reg = Reg::Scalar(1);
    pub const A0: Reg = Reg::Scalar(4);
    pub const RA: Reg = Reg::Scalar(31);
    /// Holds zero in every lane by convention; never written.
    pub const VZERO: Reg = Reg::Vector(0);
    /// Scratch vector register used by multi-instruction sequences.
    pub const VTEMP: Reg = Reg::Vector(27);

    /// Parse `$t0`, `$v0`, `$v05` style names.
    pub fn parse(name: &str) -> Option<Reg> {
        if let Some(idx) = SCALAR_REG_NAMES.iter().position(|n| *n == name) {
            return Some(Reg::Scalar(idx as u8));
        }
        let digits = name.strip_prefix("$v")?;
        if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let idx: u8 = digits.parse().ok()?;
        (idx < 32).then_some(Reg::Vector(idx))
    }

    /// Resolve a numeric `$N` register reference for the given register class.
    pub fn from_index(idx: u32, vector: bool) -> Option<Reg> {
        if idx >= 32 {
            return None;
        }
        Some(if vector { Reg::Vector(idx as u8) } else { Reg::Scalar(idx as u8) })
    }

    pub fn index(self) -> u8 {
        match self {
            Reg::Scalar(i) | Reg::Vector(i) => i,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, Reg::Vector(_))
    }

    /// The register following this one (second half of a `vec32`).
    pub fn next(self) -> Option<Reg> {
        match self {
            Reg::Vector(i) if i < 31 => Some(Reg::Vector(i + 1)),
            Reg::Scalar(i) if i < 31 => Some(Reg::Scalar(i + 1)),
            _ => None,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Scalar(i) => f.write_str(SCALAR_REG_NAMES[*i as usize]),
            Reg::Vector(i) => write!(f, "$v{:02}", i),
        }
    }
}

/// Element selector as it appears on a vector operand in assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VElem {
    /// One lane (`.e3`), broadcast when used as a source.
    E(u8),
    /// Half pattern (`.h1` = lanes 1 and 5).
    H(u8),
    /// Quarter pattern (`.q0` = lanes 0, 2, 4, 6).
    Q(u8),
}

impl VElem {
    /// Bitmask of the lanes read through this selector.
    pub fn lane_mask(self) -> u8 {
        match self {
            VElem::E(n) => 1 << n,
            VElem::H(n) => (1 << n) | (1 << (n + 4)),
            VElem::Q(n) => 0b0101_0101 << n,
        }
    }
}

impl fmt::Display for VElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VElem::E(n) => write!(f, ".e{}", n),
            VElem::H(n) => write!(f, ".h{}", n),
            VElem::Q(n) => write!(f, ".q{}", n),
        }
    }
}

const LANE_CHARS: [char; 8] = ['x', 'y', 'z', 'w', 'X', 'Y', 'Z', 'W'];

/// Source-level swizzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Swizzle {
    /// `.x` … `.W`
    Lane(u8),
    /// `.xxxxxxxx` … `.WWWWWWWW`
    Broadcast(u8),
    /// `.xxxxXXXX` … `.wwwwWWWW`
    Half(u8),
    /// `.xxzzXXZZ`, `.yywwYYWW`
    Quarter(u8),
}

impl Swizzle {
    /// Parse the letters following the dot.
    pub fn parse(s: &str) -> Option<Swizzle> {
        let chars: Vec<char> = s.chars().collect();
        let lane_of = |c: char| LANE_CHARS.iter().position(|l| *l == c).map(|p| p as u8);
        match chars.len() {
            1 => lane_of(chars[0]).map(Swizzle::Lane),
            8 => {
                if chars.iter().all(|c| *c == chars[0]) {
                    return lane_of(chars[0]).map(Swizzle::Broadcast);
                }
                for n in 0..4u8 {
                    let lo = LANE_CHARS[n as usize];
                    let hi = LANE_CHARS[n as usize + 4];
                    let half: String = [lo, lo, lo, lo, hi, hi, hi, hi].iter().collect();
                    if s == half {
                        return Some(Swizzle::Half(n));
                    }
                }
                match s {
                    "xxzzXXZZ" => Some(Swizzle::Quarter(0)),
                    "yywwYYWW" => Some(Swizzle::Quarter(1)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn is_single_lane(self) -> bool {
        matches!(self, Swizzle::Lane(_))
    }

    /// Lane index for single-lane and broadcast patterns.
    pub fn lane(self) -> Option<u8> {
        match self {
            Swizzle::Lane(n) | Swizzle::Broadcast(n) => Some(n),
            Swizzle::Half(_) | Swizzle::Quarter(_) => None,
        }
    }

    pub fn elem(self) -> VElem {
        match self {
            Swizzle::Lane(n) | Swizzle::Broadcast(n) => VElem::E(n),
            Swizzle::Half(n) => VElem::H(n),
            Swizzle::Quarter(n) => VElem::Q(n),
        }
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Swizzle::Lane(n) => write!(f, ".{}", LANE_CHARS[*n as usize]),
            Swizzle::Broadcast(n) => {
                let c = LANE_CHARS[*n as usize];
                write!(f, ".{}", std::iter::repeat(c).take(8).collect::<String>())
            }
            Swizzle::Half(n) => {
                let lo = LANE_CHARS[*n as usize].to_string().repeat(4);
                let hi = LANE_CHARS[*n as usize + 4].to_string().repeat(4);
                write!(f, ".{}{}", lo, hi)
            }
            Swizzle::Quarter(0) => f.write_str(".xxzzXXZZ"),
            Swizzle::Quarter(_) => f.write_str(".yywwYYWW"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_type_names_roundtrip() {
        assert_eq!(DataType::from_str("vec32").unwrap(), DataType::Vec32);
        assert_eq!(DataType::S16.to_string(), "s16");
        assert!(DataType::from_str("u64").is_err());
    }

    #[test]
    fn test_every_type_name_parses_back() {
        for ty in DataType::iter() {
            assert_eq!(DataType::from_str(&ty.to_string()).unwrap(), ty);
            assert_eq!(ty.byte_size() % ty.alignment(), 0);
        }
    }

    #[test]
    fn test_register_parsing() {
        assert_eq!(Reg::parse("$t0"), Some(Reg::Scalar(8)));
        assert_eq!(Reg::parse("$v0"), Some(Reg::Scalar(2)));
        assert_eq!(Reg::parse("$v05"), Some(Reg::Vector(5)));
        assert_eq!(Reg::parse("$v32"), None);
        assert_eq!(Reg::Vector(7).to_string(), "$v07");
        assert_eq!(Reg::Vector(31).next(), None);
    }

    #[test]
    fn test_swizzle_patterns() {
        assert_eq!(Swizzle::parse("x"), Some(Swizzle::Lane(0)));
        assert_eq!(Swizzle::parse("W"), Some(Swizzle::Lane(7)));
        assert_eq!(Swizzle::parse("ZZZZZZZZ"), Some(Swizzle::Broadcast(6)));
        assert_eq!(Swizzle::parse("yyyyYYYY"), Some(Swizzle::Half(1)));
        assert_eq!(Swizzle::parse("yywwYYWW"), Some(Swizzle::Quarter(1)));
        assert_eq!(Swizzle::parse("xy"), None);
        assert_eq!(Swizzle::Half(2).to_string(), ".zzzzZZZZ");
        assert_eq!(Swizzle::Half(1).elem().lane_mask(), 0b0010_0010);
        assert_eq!(Swizzle::Quarter(1).elem().lane_mask(), 0b1010_1010);
    }
}
