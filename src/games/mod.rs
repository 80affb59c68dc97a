//! Built-in game engines.

pub mod iterated_matrix;
pub mod push_your_luck;
