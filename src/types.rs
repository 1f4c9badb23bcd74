use std::fmt;

use serde::{Deserialize, Serialize};

pub type Id = i32;
pub type BranchId = i32;
pub type FunctionId = u32;
pub type VarId = u32;
pub type Value = i64;
pub type Addr = u64;

/// Virtual branch identifiers recorded for function calls and returns.
pub const CALL_ID: BranchId = -1;
pub const RETURN_ID: BranchId = -2;

pub(crate) fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

pub(crate) fn zero_extend(value: Value, bits: u32) -> Value {
    ((value as u64) & mask(bits)) as Value
}

pub(crate) fn sign_extend(value: Value, bits: u32) -> Value {
    if bits == 0 || bits >= 64 {
        value
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

/// C scalar types of the instrumented program (LP64 sizes).
///
/// For `Struct` the size is not part of the type: hooks pass it in place of
/// the concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    UChar,
    Char,
    UShort,
    Short,
    UInt,
    Int,
    ULong,
    Long,
    ULongLong,
    LongLong,
    Struct,
}

impl Type {
    pub const POINTER: Type = Type::ULong;
    pub const PTRDIFF: Type = Type::Long;

    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            -1 => Type::Bool,
            0 => Type::UChar,
            1 => Type::Char,
            2 => Type::UShort,
            3 => Type::Short,
            4 => Type::UInt,
            5 => Type::Int,
            6 => Type::ULong,
            7 => Type::Long,
            8 => Type::ULongLong,
            9 => Type::LongLong,
            10 => Type::Struct,
            _ => return None,
        })
    }

    pub fn tag(self) -> i32 {
        match self {
            Type::Bool => -1,
            Type::UChar => 0,
            Type::Char => 1,
            Type::UShort => 2,
            Type::Short => 3,
            Type::UInt => 4,
            Type::Int => 5,
            Type::ULong => 6,
            Type::Long => 7,
            Type::ULongLong => 8,
            Type::LongLong => 9,
            Type::Struct => 10,
        }
    }

    /// Unsigned (or signed) integer type occupying exactly `bytes` bytes.
    pub fn of_size(bytes: usize, signed: bool) -> Option<Self> {
        Some(match (bytes, signed) {
            (1, false) => Type::UChar,
            (1, true) => Type::Char,
            (2, false) => Type::UShort,
            (2, true) => Type::Short,
            (4, false) => Type::UInt,
            (4, true) => Type::Int,
            (8, false) => Type::ULong,
            (8, true) => Type::Long,
            _ => return None,
        })
    }

    pub fn size(self) -> usize {
        match self {
            Type::Bool | Type::UChar | Type::Char => 1,
            Type::UShort | Type::Short => 2,
            Type::UInt | Type::Int => 4,
            Type::ULong | Type::Long | Type::ULongLong | Type::LongLong => 8,
            Type::Struct => 0,
        }
    }

    pub fn bits(self) -> u32 {
        self.size() as u32 * 8
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Type::Char | Type::Short | Type::Int | Type::Long | Type::LongLong
        )
    }

    pub fn is_struct(self) -> bool {
        self == Type::Struct
    }

    /// C conversion of `value` to this type: truncate, then sign or zero
    /// extend back to 64 bits.
    pub fn normalize(self, value: Value) -> Value {
        match self {
            Type::Bool => (value != 0) as Value,
            Type::Struct => value,
            ty if ty.is_signed() => sign_extend(value, ty.bits()),
            ty => zero_extend(value, ty.bits()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "bool",
            Type::UChar => "u8",
            Type::Char => "i8",
            Type::UShort => "u16",
            Type::Short => "i16",
            Type::UInt => "u32",
            Type::Int => "i32",
            Type::ULong => "u64",
            Type::Long => "i64",
            Type::ULongLong => "u64",
            Type::LongLong => "i64",
            Type::Struct => "struct",
        };
        f.write_str(name)
    }
}

/// A concrete-only evaluation value: the type it was produced at and its
/// value on the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concrete {
    pub ty: Type,
    pub value: Value,
}

impl Concrete {
    pub fn new(ty: Type, value: Value) -> Self {
        Self {
            ty,
            value: ty.normalize(value),
        }
    }

    pub fn bytes(&self) -> usize {
        if self.ty.is_struct() {
            self.value as usize
        } else {
            self.ty.size()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
    UnsignedCast,
    SignedCast,
}

impl UnaryOp {
    /// Result of applying the operator to an operand of `operand_bits` bits,
    /// producing a value of type `ty`.
    pub fn apply(self, ty: Type, operand_bits: u32, value: Value) -> Value {
        ty.normalize(match self {
            UnaryOp::Negate => value.wrapping_neg(),
            UnaryOp::LogicalNot => (zero_extend(value, operand_bits) == 0) as Value,
            UnaryOp::BitwiseNot => !value,
            UnaryOp::UnsignedCast => zero_extend(value, operand_bits),
            UnaryOp::SignedCast => sign_extend(value, operand_bits),
        })
    }

    pub fn is_cast(self) -> bool {
        matches!(self, UnaryOp::UnsignedCast | UnaryOp::SignedCast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Div,
    SDiv,
    Mod,
    SMod,
    ShiftL,
    ShiftR,
    SShiftR,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    /// Result of the operator at the width of `ty`.
    ///
    /// Division and remainder by zero and shifts by at least the width
    /// follow bit-vector (SMT-LIB) semantics.
    pub fn apply(self, ty: Type, lhs: Value, rhs: Value) -> Value {
        let bits = ty.bits();
        let (ul, ur) = (zero_extend(lhs, bits) as u64, zero_extend(rhs, bits) as u64);
        let (sl, sr) = (sign_extend(lhs, bits), sign_extend(rhs, bits));

        ty.normalize(match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Subtract => lhs.wrapping_sub(rhs),
            BinaryOp::Multiply => lhs.wrapping_mul(rhs),
            BinaryOp::Div => {
                if ur == 0 {
                    -1
                } else {
                    (ul / ur) as Value
                }
            }
            BinaryOp::SDiv => {
                if sr == 0 {
                    if sl < 0 {
                        1
                    } else {
                        -1
                    }
                } else {
                    sl.wrapping_div(sr)
                }
            }
            BinaryOp::Mod => {
                if ur == 0 {
                    lhs
                } else {
                    (ul % ur) as Value
                }
            }
            BinaryOp::SMod => {
                if sr == 0 {
                    lhs
                } else {
                    sl.wrapping_rem(sr)
                }
            }
            BinaryOp::ShiftL => {
                if ur >= bits as u64 {
                    0
                } else {
                    ((ul << ur) & mask(bits)) as Value
                }
            }
            BinaryOp::ShiftR => {
                if ur >= bits as u64 {
                    0
                } else {
                    (ul >> ur) as Value
                }
            }
            BinaryOp::SShiftR => {
                if ur >= bits as u64 {
                    if sl < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    sl >> ur
                }
            }
            BinaryOp::BitAnd => lhs & rhs,
            BinaryOp::BitOr => lhs | rhs,
            BinaryOp::BitXor => lhs ^ rhs,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Div => "/",
            BinaryOp::SDiv => "s/",
            BinaryOp::Mod => "%",
            BinaryOp::SMod => "s%",
            BinaryOp::ShiftL => "<<",
            BinaryOp::ShiftR => ">>",
            BinaryOp::SShiftR => "s>>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Le,
    Lt,
    Ge,
    SGt,
    SLe,
    SLt,
    SGe,
}

impl CompareOp {
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Neq,
            CompareOp::Neq => CompareOp::Eq,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::SGt => CompareOp::SLe,
            CompareOp::SLe => CompareOp::SGt,
            CompareOp::SLt => CompareOp::SGe,
            CompareOp::SGe => CompareOp::SLt,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            CompareOp::SGt | CompareOp::SLe | CompareOp::SLt | CompareOp::SGe
        )
    }

    /// Compares two operands at a common width of `bits` bits.
    pub fn apply(self, bits: u32, lhs: Value, rhs: Value) -> bool {
        let (ul, ur) = (zero_extend(lhs, bits) as u64, zero_extend(rhs, bits) as u64);
        let (sl, sr) = (sign_extend(lhs, bits), sign_extend(rhs, bits));

        match self {
            CompareOp::Eq => ul == ur,
            CompareOp::Neq => ul != ur,
            CompareOp::Gt => ul > ur,
            CompareOp::Le => ul <= ur,
            CompareOp::Lt => ul < ur,
            CompareOp::Ge => ul >= ur,
            CompareOp::SGt => sl > sr,
            CompareOp::SLe => sl <= sr,
            CompareOp::SLt => sl < sr,
            CompareOp::SGe => sl >= sr,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::SGt => "s>",
            CompareOp::SLe => "s<=",
            CompareOp::SLt => "s<",
            CompareOp::SGe => "s>=",
        }
    }
}

/// Pointer arithmetic; the element size scales the integer operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PointerOp {
    AddPI,
    SubtractPI,
    SubtractPP,
}

impl PointerOp {
    pub fn result_type(self) -> Type {
        match self {
            PointerOp::AddPI | PointerOp::SubtractPI => Type::POINTER,
            PointerOp::SubtractPP => Type::PTRDIFF,
        }
    }

    pub fn rhs_type(self) -> Type {
        match self {
            PointerOp::AddPI | PointerOp::SubtractPI => Type::PTRDIFF,
            PointerOp::SubtractPP => Type::POINTER,
        }
    }

    pub fn apply(self, size: usize, lhs: Value, rhs: Value) -> Value {
        let scale = size.max(1) as Value;
        match self {
            PointerOp::AddPI => lhs.wrapping_add(rhs.wrapping_mul(scale)),
            PointerOp::SubtractPI => lhs.wrapping_sub(rhs.wrapping_mul(scale)),
            PointerOp::SubtractPP => lhs.wrapping_sub(rhs).wrapping_div(scale),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PointerOp::AddPI => "ptradd",
            PointerOp::SubtractPI => "ptrsub",
            PointerOp::SubtractPP => "ptrdiff",
        }
    }
}

/// Operator tags as emitted by the instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    Pointer(PointerOp),
    /// The result has no symbolic model and is tracked concretely.
    Concrete,
}

impl Operator {
    pub fn from_tag(tag: u32) -> Option<Self> {
        use BinaryOp::*;
        use CompareOp::*;

        Some(match tag {
            0 => Operator::Binary(Add),
            1 => Operator::Binary(Subtract),
            2 => Operator::Binary(Multiply),
            3 => Operator::Binary(Div),
            4 => Operator::Binary(SDiv),
            5 => Operator::Binary(Mod),
            6 => Operator::Binary(SMod),
            7 => Operator::Binary(ShiftL),
            8 => Operator::Binary(ShiftR),
            9 => Operator::Binary(SShiftR),
            10 => Operator::Binary(BitAnd),
            11 => Operator::Binary(BitOr),
            12 => Operator::Binary(BitXor),
            13 => Operator::Compare(Eq),
            14 => Operator::Compare(Neq),
            15 => Operator::Compare(Gt),
            16 => Operator::Compare(SGt),
            17 => Operator::Compare(Le),
            18 => Operator::Compare(SLe),
            19 => Operator::Compare(Lt),
            20 => Operator::Compare(SLt),
            21 => Operator::Compare(Ge),
            22 => Operator::Compare(SGe),
            23 => Operator::Concrete,
            24 => Operator::Unary(UnaryOp::Negate),
            25 => Operator::Unary(UnaryOp::BitwiseNot),
            26 => Operator::Unary(UnaryOp::LogicalNot),
            27 => Operator::Unary(UnaryOp::UnsignedCast),
            28 => Operator::Unary(UnaryOp::SignedCast),
            29 => Operator::Pointer(PointerOp::AddPI),
            30 => Operator::Pointer(PointerOp::SubtractPI),
            31 => Operator::Pointer(PointerOp::SubtractPP),
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Operator::Unary(_) => 1,
            _ => 2,
        }
    }
}
