pub mod output;
pub mod xyz;
