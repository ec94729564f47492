#![no_std]

// Library target so the userspace crate can list the probes as a build
// dependency; the program itself lives in main.rs.
