//! Stateless array operations on NHWC feature maps.
//!
//! Nothing here touches the parameter store; the layer constructors in
//! [`crate::layers`] combine these with stored weights.

pub mod activation;
pub mod conv;
pub mod pool;

pub use activation::{leaky_relu, sigmoid, LocalResponseNorm, LEAKY_RELU_ALPHA};
pub use conv::{
    bias_add, conv2d_same, conv2d_transpose, conv2d_valid, pad_spatial, same_padding,
    transpose_output_size, PadMode, Pads,
};
pub use pool::{
    flatten, global_avg_pooling_2d, global_sum_pooling_2d, hw_flatten, max_pooling_2d,
    up_sample_2d,
};
