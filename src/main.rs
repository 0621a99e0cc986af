//! sarprep CLI - Sentinel-1 ARD preprocessing

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sarprep::config::{ArdParameters, ArdType, Metric, OutputDtype, ProcessingConfig, Resampling};
use sarprep::core::batch::{self, BatchStages, Inventory};
use sarprep::core::grd_to_ard::CreateArdOptions;
use sarprep::core::mosaic::{self, MosaicOptions};
use sarprep::core::timescan::{self, TimescanParams};
use sarprep::core::raster::ard_to_rgb;
use sarprep::core::{DimapProduct, Gpt};
use sarprep::io::stac::{write_stac_for_product, zip_from_stac};
use sarprep::io::{Credentials, Downloader, Mirror, SafeManifest, Sentinel1Scene};
use sarprep::logging::init_logging;
use sarprep::types::ProductType;

#[derive(Parser)]
#[command(name = "sarprep")]
#[command(author, version, about = "Sentinel-1 analysis-ready-data preprocessing", long_about = None)]
struct Cli {
    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the metadata encoded in a scene identifier
    Info {
        scene_id: String,
    },
    /// Print or write an ARD parameter template
    Config {
        #[arg(long, default_value = "GRD")]
        product_type: String,
        #[arg(long, default_value = "OST-GTC")]
        ard_type: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Process a single GRD scene to backscatter ARD
    Preprocess {
        /// Product zip or SAFE, STAC catalog directory, or scene identifier to download
        input: String,
        /// Output resolution in metres
        #[arg(long, default_value_t = 20)]
        resolution: u32,
        /// ARD type: OST-GTC, OST-RTC, CEOS, Earth-Engine
        #[arg(long, default_value = "Earth-Engine")]
        ard_type: String,
        #[arg(long)]
        with_speckle_filter: bool,
        #[arg(long, default_value = "BILINEAR_INTERPOLATION")]
        resampling_method: String,
        #[arg(long, env = "CDSE_USER")]
        cdse_user: Option<String>,
        #[arg(long, env = "CDSE_PASSWORD")]
        cdse_password: Option<String>,
        #[arg(long, default_value = "/home/ost/shared")]
        out_dir: PathBuf,
        /// Also write a GeoTIFF of the result
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        to_tif: bool,
        /// Write a STAC catalog describing the result
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        stac: bool,
        /// Subset to this area of interest (WKT, EPSG:4326)
        #[arg(long)]
        aoi: Option<String>,
        #[arg(long)]
        overwrite: bool,
        /// Geocode with this DEM file instead of the auto-downloaded one
        #[arg(long)]
        external_dem: Option<PathBuf>,
        /// Also write a co/cross/ratio RGB composite
        #[arg(long)]
        rgb: bool,
        /// gpt executable, searched for otherwise
        #[arg(long, env = "GPT_PATH")]
        gpt: Option<PathBuf>,
    },
    /// Download scenes
    Download {
        #[arg(required = true)]
        scene_ids: Vec<String>,
        #[arg(long, default_value = "cdse")]
        mirror: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "SARPREP_PASSWORD")]
        password: String,
        #[arg(long, default_value = ".")]
        download_dir: PathBuf,
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Process an inventory of GRD scenes
    Batch {
        /// One scene identifier or product path per line
        #[arg(long)]
        inventory: PathBuf,
        /// processing.json
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        timeseries: bool,
        #[arg(long)]
        timescan: bool,
        #[arg(long)]
        mosaic: bool,
        #[arg(long, env = "GPT_PATH")]
        gpt: Option<PathBuf>,
    },
    /// Multi-temporal metrics of a stack
    Timescan {
        /// Multi-band stack, e.g. a time-series VRT
        stack: PathBuf,
        /// Output prefix, metrics land in <prefix>.<metric>.tif
        prefix: PathBuf,
        #[arg(long, value_delimiter = ',', value_parser = parse_metric, default_value = "avg,max,min,std,cov")]
        metrics: Vec<Metric>,
        #[arg(long, value_parser = parse_dtype, default_value = "float32")]
        dtype: OutputDtype,
        /// Stack holds dB values
        #[arg(long)]
        to_power: bool,
        #[arg(long)]
        remove_outliers: bool,
        /// Layer dates as yymmdd, needed for harmonics
        #[arg(long, value_delimiter = ',')]
        dates: Vec<String>,
        /// Layover/shadow mask on the stack grid; flagged pixels become no-data
        #[arg(long)]
        ls_mask: Option<PathBuf>,
    },
    /// Mosaic layers of several tracks
    Mosaic {
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        harmonize: bool,
        /// Cut to this area of interest (WKT, EPSG:4326)
        #[arg(long)]
        cut_to: Option<String>,
        #[arg(long, value_parser = parse_dtype, default_value = "float32")]
        dtype: OutputDtype,
        #[arg(long, default_value = "/tmp")]
        temp_dir: PathBuf,
    },
}

fn parse_metric(s: &str) -> Result<Metric, String> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .map_err(|_| format!("unknown metric: {}", s))
}

fn parse_dtype(s: &str) -> Result<OutputDtype, String> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .map_err(|_| format!("unknown data type: {}", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    init_logging(level, cli.logfile.as_deref())?;

    match cli.command {
        Commands::Info { scene_id } => {
            let scene = Sentinel1Scene::parse(&scene_id)?;
            println!("{}", serde_json::to_string_pretty(&scene.info())?);
        }
        Commands::Config { product_type, ard_type, output } => {
            let params = ArdParameters::template(ProductType::from_str(&product_type)?, ArdType::from_str(&ard_type)?)?;
            let json = params.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                    log::info!("Wrote {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Preprocess {
            input,
            resolution,
            ard_type,
            with_speckle_filter,
            resampling_method,
            cdse_user,
            cdse_password,
            out_dir,
            to_tif,
            stac,
            aoi,
            overwrite,
            external_dem,
            rgb,
            gpt,
        } => {
            std::fs::create_dir_all(&out_dir)?;
            let credentials = match (cdse_user, cdse_password) {
                (Some(user), Some(password)) => Some(Credentials::new(&user, &password)),
                _ => None,
            };
            let (scene, product) = resolve_input(&input, &out_dir, credentials)?;
            log::info!("Processing {}", scene.scene_id);

            let mut params = ArdParameters::template(scene.product_type, ArdType::from_str(&ard_type)?)?;
            params.single_ard.resolution = resolution;
            params.single_ard.remove_speckle = with_speckle_filter;
            params.single_ard.dem.image_resampling = Resampling::from_str(&resampling_method)?;
            params.single_ard.to_tif = to_tif;
            if let Some(dem) = external_dem {
                params.set_external_dem(&dem, 0, true)?;
            }

            let already_db = params.single_ard.to_db;
            let options = CreateArdOptions { subset: aoi, overwrite, gpt };
            let outputs = scene
                .create_ard(&product, &out_dir, params, &options)
                .with_context(|| format!("processing {}", scene.scene_id))?;

            if rgb {
                let product = DimapProduct::from_dim(&outputs.backscatter);
                let composite = outputs.backscatter.with_extension("rgb.tif");
                ard_to_rgb(&product, &composite, !already_db)?;
            }

            if stac {
                let asset = outputs.geotiff.clone().unwrap_or_else(|| outputs.backscatter.clone());
                let bbox = SafeManifest::open(&product).and_then(|m| m.bounding_box()).ok();
                write_stac_for_product(&out_dir, &scene.scene_id, &asset, scene.start, bbox)?;
            }
            println!("{}", outputs.backscatter.display());
        }
        Commands::Download { scene_ids, mirror, username, password, download_dir, concurrency } => {
            let scenes = scene_ids
                .iter()
                .map(|id| Sentinel1Scene::parse(id))
                .collect::<Result<Vec<_>, _>>()?;
            let mut downloader = Downloader::new(Mirror::from_str(&mirror)?, Credentials::new(&username, &password))?;
            downloader.authenticate()?;
            let mut failed = 0;
            for (id, result) in downloader.download_batch(&scenes, &download_dir, concurrency)? {
                match result {
                    Ok(path) => println!("{}", path.display()),
                    Err(e) => {
                        log::error!("{}: {}", id, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} downloads failed", failed, scenes.len());
            }
        }
        Commands::Batch { inventory, config, timeseries, timescan, mosaic, gpt } => {
            let config = ProcessingConfig::load(&config)?;
            let inventory = Inventory::from_file(&inventory)?;
            let gpt = match gpt {
                Some(path) => Gpt::new(path, config.snap_cpu_parallelism),
                None => Gpt::locate(config.snap_cpu_parallelism)?,
            };
            let stages = BatchStages { timeseries, timescan, mosaic };
            let processed = batch::process_inventory(&gpt, &config, &inventory, stages)?;
            println!("{}", serde_json::to_string_pretty(&processed)?);
            if processed.iter().any(|p| !p.is_ok()) {
                bail!("some acquisitions failed");
            }
        }
        Commands::Timescan { stack, prefix, metrics, dtype, to_power, remove_outliers, dates, ls_mask } => {
            let dates = if dates.is_empty() {
                None
            } else {
                Some(
                    dates
                        .iter()
                        .map(|d| NaiveDate::parse_from_str(d, "%y%m%d"))
                        .collect::<Result<Vec<_>, _>>()
                        .context("dates must be yymmdd")?,
                )
            };
            let params = TimescanParams {
                metrics,
                dtype,
                rescale: dtype != OutputDtype::Float32,
                to_power,
                remove_outliers,
                dates,
                ls_mask,
            };
            for file in timescan::mt_metrics(&stack, &prefix, &params)? {
                println!("{}", file.display());
            }
        }
        Commands::Mosaic { output, inputs, harmonize, cut_to, dtype, temp_dir } => {
            let options = MosaicOptions { harmonize, cut_to, dtype, temp_dir };
            let out = mosaic::mosaic(&inputs, &output, &options)?;
            println!("{}", out.display());
        }
    }
    Ok(())
}

/// Find the product for `input`, linking or downloading it into the
/// `SAR/GRD/YYYY/MM/DD` layout below `out_dir`
fn resolve_input(input: &str, out_dir: &Path, credentials: Option<Credentials>) -> Result<(Sentinel1Scene, PathBuf)> {
    let path = Path::new(input);

    if path.join("catalog.json").exists() {
        let zip = zip_from_stac(path)?;
        let scene = Sentinel1Scene::from_path(&zip)?;
        let target = scene.download_path(out_dir, true)?;
        if !target.exists() {
            if std::fs::hard_link(&zip, &target).is_err() {
                std::fs::copy(&zip, &target)
                    .with_context(|| format!("copying {} to {}", zip.display(), target.display()))?;
            }
        }
        std::fs::write(scene.download_marker(out_dir)?, "successfully found here")?;
        return Ok((scene, target));
    }

    if path.exists() {
        return Ok((Sentinel1Scene::from_path(path)?, path.to_path_buf()));
    }

    let scene = Sentinel1Scene::parse(input)?;
    if let Some(found) = scene.get_path(Some(out_dir), None)? {
        return Ok((scene, found));
    }
    let credentials = match credentials {
        Some(c) => c,
        None => bail!("{} is not available locally and no CDSE credentials were given", input),
    };
    let mut downloader = Downloader::new(Mirror::Cdse, credentials)?;
    downloader.authenticate()?;
    let product = downloader.download_scene(&scene, out_dir)?;
    Ok((scene, product))
}
