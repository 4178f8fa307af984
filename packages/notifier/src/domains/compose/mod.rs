//! Message composition: the user-independent common part is computed once
//! per event, the personal part once per surviving recipient.

pub mod common;
pub mod personal;
