//! wavetrace CLI - render, benchmark and inspect the built-in scenes.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wavetrace::config::RenderSettings;
use wavetrace::estimator::{EstimatorKind, QualityLevel};
use wavetrace::kernels::camera::generate_primary_rays;
use wavetrace::renderer::{AovKind, Film};
use wavetrace::scene::{Preset, Projection};
use wavetrace::session::RenderSession;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("WAVETRACE_BUILD_DATE"),
    " ",
    env!("WAVETRACE_BUILD_TIME"),
    ")"
);

/// Default log filter per verbosity flag.
fn default_filter(level: u8) -> &'static str {
    match level {
        0 => "wavetrace=warn",
        1 => "wavetrace=info",
        2 => "wavetrace=debug",
        _ => "wavetrace=trace",
    }
}

/// fmt output filtered by `RUST_LOG` (or the verbosity default), plus a
/// chrome trace in `trace.json` when `WAVETRACE_TRACE=1`.
fn init_tracing(level: u8) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let fmt = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (chrome, guard) = if env::var("WAVETRACE_TRACE").ok().as_deref() == Some("1") {
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry().with(filter).with(fmt).with(chrome).try_init();
    guard
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut level = 1u8;
    let mut rest: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "-v" | "--verbose" => level = 2,
            "-vv" | "--trace" => level = 3,
            "-q" | "--quiet" => level = 0,
            _ => rest.push(arg),
        }
    }
    let _guard = init_tracing(level);

    let Some((&command, opts)) = rest.split_first() else {
        print_help();
        return;
    };

    let result = match command {
        "render" | "r" => cmd_render(opts),
        "bench" | "b" => cmd_bench(opts),
        "info" | "i" => cmd_info(opts),
        "help" | "h" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("wavetrace {VERSION}");
            Ok(())
        }
        other => Err(anyhow!("unknown command '{other}'")),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("wavetrace {VERSION}");
    println!();
    println!("Usage: wavetrace [-v|-vv|-q] <command> [options]");
    println!();
    println!("Commands:");
    println!("  render   Render a scene to an image");
    println!("  bench    Measure intersection throughput");
    println!("  info     Describe a scene");
    println!();
    println!("Options:");
    println!("  --config <file>        Load settings JSON");
    println!("  --save-config <file>   Write the effective settings JSON");
    println!("  --scene <name>         cornell | lit_plane | fog | sky");
    println!("  --estimator <name>     pt | bdpt");
    println!("  --size <w>x<h>         Image size");
    println!("  --samples <n>          Samples per pixel");
    println!("  --bounces <n>          Maximum bounces");
    println!("  --devices <n>          Render devices (worker threads + 1)");
    println!("  --seed <n>             Random seed");
    println!("  --quality <q>          rough | normal | precise");
    println!("  --dof <a>:<f>          Thin lens of radius a focused at distance f");
    println!("  --ortho <h>            Orthographic view of world height h");
    println!("  --aov <kind>           Also write an AOV image (repeatable)");
    println!("  -o, --output <file>    Output image (png, hdr, exr)");
    println!();
    println!("Environment:");
    println!("  RUST_LOG               Log filter, overrides -v/-q");
    println!("  WAVETRACE_TRACE=1      Write a chrome trace to trace.json");
}

/// Options shared by every command.
struct Options {
    settings: RenderSettings,
    output: PathBuf,
    save_config: Option<PathBuf>,
    aovs: Vec<AovKind>,
}

fn parse<T: FromStr>(flag: &str, value: Option<&&str>) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let value = value.ok_or_else(|| anyhow!("{flag} needs a value"))?;
    value.parse::<T>().map_err(|e| anyhow!("invalid value '{value}' for {flag}: {e}"))
}

fn parse_options(opts: &[&str]) -> Result<Options> {
    // The config file is the base; flags override it wherever they appear.
    let mut settings = match opts.iter().position(|&o| o == "--config") {
        Some(i) => {
            let path = PathBuf::from(*opts.get(i + 1).ok_or_else(|| anyhow!("--config needs a value"))?);
            RenderSettings::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => RenderSettings::default(),
    };
    let mut output = PathBuf::from("render.png");
    let mut save_config = None;
    let mut aovs = Vec::new();

    let mut it = opts.iter();
    while let Some(&flag) = it.next() {
        match flag {
            "--config" => {
                it.next();
            }
            "--save-config" => save_config = Some(PathBuf::from(parse::<String>(flag, it.next())?)),
            "--scene" => settings.scene = parse::<Preset>(flag, it.next())?,
            "--estimator" => settings.estimator = parse::<EstimatorKind>(flag, it.next())?,
            "--size" => {
                let v: String = parse(flag, it.next())?;
                let (w, h) = v.split_once('x').ok_or_else(|| anyhow!("--size expects <w>x<h>"))?;
                settings.width = w.parse().context("image width")?;
                settings.height = h.parse().context("image height")?;
            }
            "--samples" => settings.samples = parse(flag, it.next())?,
            "--bounces" => settings.max_bounces = parse(flag, it.next())?,
            "--devices" => settings.devices = parse(flag, it.next())?,
            "--seed" => settings.seed = parse(flag, it.next())?,
            "--quality" => {
                let v: String = parse(flag, it.next())?;
                settings.quality = match v.as_str() {
                    "rough" => QualityLevel::Rough,
                    "normal" => QualityLevel::Normal,
                    "precise" => QualityLevel::Precise,
                    _ => bail!("unknown quality '{v}'"),
                };
            }
            "--dof" => {
                let v: String = parse(flag, it.next())?;
                let (aperture, focus) = v.split_once(':').ok_or_else(|| anyhow!("--dof expects <aperture>:<focus>"))?;
                settings.projection = Some(Projection::PerspectiveDof {
                    aperture: aperture.parse().context("lens aperture")?,
                    focus_distance: focus.parse().context("focus distance")?,
                });
            }
            "--ortho" => {
                settings.projection = Some(Projection::Orthographic {
                    height: parse(flag, it.next())?,
                })
            }
            "--aov" => aovs.push(parse::<AovKind>(flag, it.next())?),
            "-o" | "--output" => output = PathBuf::from(parse::<String>(flag, it.next())?),
            other => bail!("unknown option '{other}'"),
        }
    }
    settings.validate()?;
    Ok(Options {
        settings,
        output,
        save_config,
        aovs,
    })
}

fn cmd_render(opts: &[&str]) -> Result<()> {
    let Options {
        settings,
        output,
        save_config,
        aovs,
    } = parse_options(opts)?;
    if let Some(path) = &save_config {
        settings.save(path).with_context(|| format!("writing {}", path.display()))?;
    }

    let scene = settings.build_scene()?;
    tracing::info!(scene = %settings.scene, ?scene, "scene built");

    let start = Instant::now();
    let mut session = RenderSession::new(settings.clone(), scene)?;
    session.render_to(u64::from(settings.samples))?;
    session.stop();
    let elapsed = start.elapsed();

    for (device, stats) in session.device_stats().iter().enumerate() {
        if let Some(err) = &stats.error {
            tracing::warn!(device, error = %err, "device failed");
        }
        tracing::info!(device, samples = stats.samples, "device done");
    }
    println!(
        "Rendered {}x{} with {} samples ({}, {} device(s)) in {:.2}s",
        settings.width,
        settings.height,
        session.samples(),
        settings.estimator,
        settings.devices,
        elapsed.as_secs_f64()
    );
    if session.stale_dropped() > 0 {
        println!("Dropped {} stale snapshot(s)", session.stale_dropped());
    }

    session
        .film()
        .save(&output, settings.exposure)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {}", output.display());

    if !aovs.is_empty() {
        write_aovs(&settings, &aovs, &output)?;
    }
    Ok(())
}

/// One pixel-centre pass per AOV on a dedicated renderer.
fn write_aovs(settings: &RenderSettings, kinds: &[AovKind], output: &std::path::Path) -> Result<()> {
    let scene = settings.build_scene()?;
    let mut renderer = settings.create_renderer(0)?;
    let beauty = Film::new(settings.width, settings.height)?;
    let mut films = Vec::new();
    for &kind in kinds {
        let film = Film::new(settings.width, settings.height)?;
        renderer.set_aov(kind, Some(film.clone()));
        films.push((kind, film));
    }
    renderer.render(&scene, &beauty)?;

    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("render");
    for (kind, film) in films {
        let path = output.with_file_name(format!("{stem}.{kind}.exr"));
        film.save(&path, 0.0).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn cmd_bench(opts: &[&str]) -> Result<()> {
    let Options { settings, .. } = parse_options(opts)?;
    let scene = settings.build_scene()?;
    let mut renderer = settings.create_renderer(0)?;

    // Pixel-centre rays for the first tile's worth of pixels.
    let (tw, th) = settings.tile_size();
    let n = tw as usize * th as usize;
    let cells: Vec<u32> = (0..n as u32).collect();
    let rays = renderer.estimator_mut().ray_buffer_mut()?;
    generate_primary_rays(scene.camera(), &cells, 0, 0, false, rays);
    let stats = renderer.estimator_mut().benchmark(&scene, n)?;

    println!("{} on {} ({}x{})", settings.estimator, settings.scene, settings.width, settings.height);
    println!("  primary:   {:>8.2} Mrays/s", stats.primary_rays_per_sec / 1.0e6);
    println!("  secondary: {:>8.2} Mrays/s", stats.secondary_rays_per_sec / 1.0e6);
    println!("  shadow:    {:>8.2} Mrays/s", stats.shadow_rays_per_sec / 1.0e6);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cmd_info(opts: &[&str]) -> Result<()> {
    let Options { settings, .. } = parse_options(opts)?;
    let scene = settings.build_scene()?;
    let cam = scene.camera();
    println!("Scene: {}", settings.scene);
    println!("  triangles:   {}", scene.geometry().triangles.len());
    println!("  shapes:      {}", scene.shapes().len());
    println!("  materials:   {}", scene.materials().len());
    println!("  lights:      {}", scene.lights().len());
    println!("  volumes:     {}", scene.volumes().len());
    println!("  environment: {}", if scene.has_environment() { "yes" } else { "no" });
    println!("  radius:      {:.3}", scene.radius());
    println!("  intersector: {}", scene.accel().name());
    println!("Camera:");
    println!("  position:    {:?}", cam.position.to_array());
    println!("  forward:     {:?}", cam.forward.to_array());
    println!("  resolution:  {}x{}", cam.width, cam.height);
    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
