fn main() {
    // Both values are read with `option_env!` in `src/config.rs`.
    println!("cargo:rerun-if-env-changed=CGHOST_ALLOCATOR_STACK_SIZE");
    println!("cargo:rerun-if-env-changed=CGHOST_CHUNK_SIZE");
}
