use std::env;

fn main() {
    // `gdal-sys` declares `links = "gdal"` and exports the detected version to direct dependents.
    let gdal_version_string = env::var("DEP_GDAL_VERSION_NUMBER")
        .expect("gdal-sys did not export DEP_GDAL_VERSION_NUMBER");
    let gdal_version = gdal_version_string
        .parse::<i64>()
        .expect("Could not convert gdal version string into number.");
    let major = gdal_version / 1_000_000;
    let minor = (gdal_version - major * 1_000_000) / 10_000;
    let patch = (gdal_version - major * 1_000_000 - minor * 10_000) / 100;

    if major < 3 {
        panic!("ogrio requires GDAL 3.x or newer, detected version {major}.{minor}.{patch}");
    }

    println!("cargo:rustc-cfg=major_is_{major}");
    for m in 3..=major {
        println!("cargo:rustc-cfg=major_ge_{m}");
    }
    for m in 1..=minor {
        println!("cargo:rustc-cfg=minor_ge_{m}");
    }
    println!("cargo:rerun-if-env-changed=DEP_GDAL_VERSION_NUMBER");
}
