//! # RTorch RNN Core Library
//!
//! Recurrent layers with explicit forward and backward passes over padded
//! batches: a single-step [`nn::RnnCell`], the sequence runner [`nn::Rnn`]
//! that backpropagates through time, and [`nn::BidirectionalRnn`].
//!
//! Padding is carried as an explicit validity mask next to the values
//! ([`tensor::MaskedSequence`]); padded steps produce padded outputs and
//! zero gradients.
//!
//! ```
//! use ndarray::{array, Array3};
//! use rtorch_rnn::prelude::*;
//!
//! let cell = RnnCell::new(4, 5, "rnn_cell", &Initializer::default()).unwrap();
//! let rnn = Rnn::new(&cell, None, "rnn").unwrap();
//!
//! let x = MaskedSequence::new(
//!     Array3::ones((2, 3, 4)),
//!     array![[true, true, false], [true, false, false]],
//! )
//! .unwrap();
//! let h = rnn.forward(&x).unwrap();
//! assert_eq!(h.values().dim(), (2, 3, 5));
//! assert_eq!(h.mask(), x.mask());
//! ```

pub mod nn;
pub mod tensor;
pub mod utils;

pub mod prelude {
    pub use crate::nn::{
        BidirectionalRnn, BidirectionalRnnConfig, CellGrads, InitialStatePolicy, Initializer, Layer, ParamMap,
        ParamSnapshot, Rnn, RnnCell, RnnCellConfig, RnnConfig,
    };
    pub use crate::tensor::{MaskedSequence, MaskedStep, Tensor, TensorData, TensorError, SENTINEL};
}
