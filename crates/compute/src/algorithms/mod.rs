pub mod pagerank;
