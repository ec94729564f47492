use which::which;

/// Building this crate has an undeclared dependency on the `bpf-linker` binary. Rerun the build
/// script when it changes so cargo relinks the probes with the new linker.
fn main() {
    let bpf_linker = which("bpf-linker").unwrap();
    println!("cargo:rerun-if-changed={}", bpf_linker.to_str().unwrap());
}
