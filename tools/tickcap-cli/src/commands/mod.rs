pub mod align;
pub mod align_batch;
pub mod check;
pub mod compare;
pub mod info;
pub mod serve;
