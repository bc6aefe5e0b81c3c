pub mod retrier;
