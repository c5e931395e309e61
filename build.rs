use std::env;
use std::path::PathBuf;

fn main() {
    if env::var("DOCS_RS").is_ok() {
        return;
    }
    if env::var("CARGO_FEATURE_OPTIX").is_err() {
        return;
    }

    println!("cargo:rerun-if-env-changed=OPTIX_ROOT");
    println!("cargo:rerun-if-env-changed=OPTIX_ROOT_DIR");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    // The optix crate locates the SDK itself; warn early with a clearer hint if it will not.
    let optix_root = env::var("OPTIX_ROOT")
        .or_else(|_| env::var("OPTIX_ROOT_DIR"))
        .map(PathBuf::from);
    match optix_root {
        Ok(root) if root.join("include").join("optix.h").exists() => {}
        Ok(root) => {
            println!(
                "cargo:warning=optix-denoiser: {} does not contain include/optix.h",
                root.display()
            );
        }
        Err(_) => {
            println!("cargo:warning=optix-denoiser: OPTIX_ROOT is not set.");
            println!(
                "cargo:warning=Set OPTIX_ROOT to the OptiX SDK install directory (containing include/optix.h)."
            );
        }
    }

    if env::var("CUDA_PATH").is_err() && !PathBuf::from("/usr/local/cuda").exists() {
        println!("cargo:warning=optix-denoiser: CUDA toolkit not found; set CUDA_PATH.");
    }
}
