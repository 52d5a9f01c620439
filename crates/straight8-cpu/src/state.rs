//! CPU major states.
//!
//! The PDP-8 sequences every instruction through up to three major
//! states. Modeling them explicitly (rather than flattening each
//! instruction into one step) preserves the single-step behavior of the
//! real front panel and confines interrupt admission to fetch
//! boundaries.

/// Major state about to be executed by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MajorState {
    /// Fetch and decode the word at IF|PC. IOT and operate instructions
    /// complete entirely within this state, as does direct JMP.
    #[default]
    Fetch,

    /// Read an indirect pointer, auto-incrementing locations 0010-0017,
    /// and resolve the effective address. Indirect JMP completes here.
    Defer,

    /// Perform the data operation for AND/TAD/ISZ/DCA/JMS with the
    /// resolved effective address.
    Execute,
}
