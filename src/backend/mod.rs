pub mod llvm_backend;
pub mod scope;
