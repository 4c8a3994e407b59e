//! The opcode table.
//!
//! A single declarative table defines every opcode's operand width and
//! fixed operand-stack delta; the enum and its metadata accessors both
//! derive from it, so the two can never drift apart. Operands are
//! big-endian. Opcodes whose stack effect depends on their operand (calls
//! and collection builders) carry a fixed delta of zero here and the
//! emitter applies the operand-dependent part itself.

macro_rules! define_opcodes {
    ($( $(#[$meta:meta])* $name:ident = ($params:expr, $stack:expr) ),* $(,)?) => {
        /// A bytecode operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$meta])* $name ),*
        }

        impl Opcode {
            /// Operand width in bytes (0, 1 or 2).
            #[must_use]
            pub const fn params(self) -> u8 {
                match self {
                    $( Self::$name => $params ),*
                }
            }

            /// Fixed effect on operand-stack depth: positive pushes,
            /// negative pops.
            #[must_use]
            pub const fn stack_effect(self) -> i32 {
                match self {
                    $( Self::$name => $stack ),*
                }
            }
        }
    };
}

define_opcodes! {
    /// Push a literal; operand indexes the script's literal pool.
    Constant = (2, 1),
    /// Push null.
    PushNull = (0, 1),
    /// Push a copy of the local at the operand slot.
    PushLocal = (1, 1),
    /// Store the stack top into the operand slot, leaving the value.
    StoreLocal = (1, 0),
    /// Push the global at the operand index.
    PushGlobal = (2, 1),
    /// Store the stack top into the operand global, leaving the value.
    StoreGlobal = (2, 0),
    /// Push the function at the operand index of the enclosing script.
    PushFn = (2, 1),
    /// Push a global of an imported script; operand packs (import, index).
    PushGlobalExt = (2, 1),
    /// Push a function of an imported script; operand packs (import, index).
    PushFnExt = (2, 1),
    /// Pop the operand-count elements, push the resulting list.
    BuildList = (2, 0),
    /// Pop operand-count key/value pairs, push the resulting map.
    BuildMap = (2, 0),
    /// Call the value below the operand-count arguments.
    Call = (1, 0),
    /// Pop index and container, push the element.
    GetSubscript = (0, -1),
    /// Pop value, index and container, push the value back.
    SetSubscript = (0, -2),
    /// Pop the receiver, push its attribute; operand indexes script names.
    GetAttrib = (2, 0),
    /// Pop value and receiver, push the value back.
    SetAttrib = (2, -1),
    /// Resolve and load the module named by the operand script-name index.
    Import = (2, 0),
    /// Unconditional jump to the absolute operand target.
    Jump = (2, 0),
    /// Pop the condition; jump when falsy.
    JumpIfNot = (2, -1),
    /// Discard the stack top.
    Pop = (0, -1),
    /// Return the stack top from the current function.
    Return = (0, -1),

    // Binary operators: pop two, push one.
    Range = (0, -1),
    Mod = (0, -1),
    BitAnd = (0, -1),
    BitOr = (0, -1),
    BitXor = (0, -1),
    Add = (0, -1),
    Subtract = (0, -1),
    Multiply = (0, -1),
    Divide = (0, -1),
    Gt = (0, -1),
    Lt = (0, -1),
    EqEq = (0, -1),
    NotEq = (0, -1),
    GtEq = (0, -1),
    LtEq = (0, -1),
    BitRshift = (0, -1),
    BitLshift = (0, -1),
    Is = (0, -1),
    In = (0, -1),
    And = (0, -1),
    Or = (0, -1),

    // Unary operators: pop one, push one.
    BitNot = (0, 0),
    Negative = (0, 0),
    Not = (0, 0),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_round_trip() {
        assert_eq!(Opcode::from_repr(Opcode::Constant as u8), Some(Opcode::Constant));
        assert_eq!(Opcode::from_repr(Opcode::Not as u8), Some(Opcode::Not));
        assert_eq!(Opcode::from_repr(0xff), None);
    }

    #[test]
    fn test_operand_widths() {
        assert_eq!(Opcode::Constant.params(), 2);
        assert_eq!(Opcode::PushLocal.params(), 1);
        assert_eq!(Opcode::Add.params(), 0);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::Constant.stack_effect(), 1);
        assert_eq!(Opcode::Add.stack_effect(), -1);
        assert_eq!(Opcode::Negative.stack_effect(), 0);
        assert_eq!(Opcode::SetSubscript.stack_effect(), -2);
    }
}
