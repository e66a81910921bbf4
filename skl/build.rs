fn main() {
    println!("cargo:rustc-link-arg=-nostdlib");
    println!("cargo:rustc-link-arg=--build-id=none");
    println!("cargo:rustc-link-arg=-Tsrc/skl.lds");
    println!("cargo:rustc-link-arg=-no-pie");
    println!("cargo:rerun-if-changed=src/skl.lds");
    println!("cargo:rerun-if-changed=build.rs");
}
