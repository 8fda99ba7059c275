use time::macros::format_description;

fn main() {
    let now = time::OffsetDateTime::now_utc();
    let date_fmt = format_description!("[year]-[month]-[day]");
    let time_fmt = format_description!("[hour]:[minute]");

    let date = std::env::var("WAVETRACE_BUILD_DATE")
        .unwrap_or_else(|_| now.format(date_fmt).unwrap_or_else(|_| "unknown".to_string()));
    let time = std::env::var("WAVETRACE_BUILD_TIME")
        .unwrap_or_else(|_| now.format(time_fmt).unwrap_or_else(|_| "unknown".to_string()));

    println!("cargo:rustc-env=WAVETRACE_BUILD_DATE={}", date);
    println!("cargo:rustc-env=WAVETRACE_BUILD_TIME={}", time);
    println!("cargo:rerun-if-env-changed=WAVETRACE_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=WAVETRACE_BUILD_TIME");
}
