/// Constant-product (x * y = k) pricing.
pub mod constant_product;
