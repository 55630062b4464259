//! # Neural Network Layer Modules
//!
//! Recurrent layers, leaves first: the single-step [`RnnCell`], the
//! sequence runner [`Rnn`] that unrolls it, and [`BidirectionalRnn`].

pub mod rnn_cell;
pub use rnn_cell::{CellGrads, RnnCell};

pub mod rnn;
pub use rnn::Rnn;

pub mod bidirectional;
pub use bidirectional::BidirectionalRnn;
