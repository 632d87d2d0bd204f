pub mod bvp;
