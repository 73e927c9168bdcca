use std::path::PathBuf;

use anyhow::anyhow;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use gaia_catalog::{BuilderConfig, CatalogReader};

mod cmdline {
    use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

    //fp add_catalog_arg
    pub fn add_catalog_arg(cmd: Command) -> Command {
        cmd.arg(
            Arg::new("catalog")
                .long("catalog")
                .short('c')
                .required(true)
                .help("Path to the catalog file or multi-file directory")
                .action(ArgAction::Set),
        )
    }
    pub fn catalog(matches: &ArgMatches) -> String {
        matches.get_one::<String>("catalog").unwrap().to_string()
    }

    //fp add_radec_args
    pub fn add_radec_args(cmd: Command) -> Command {
        cmd.arg(
            Arg::new("ra")
                .long("ra")
                .required(true)
                .help("Right ascension, degrees")
                .value_parser(value_parser!(f64))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("dec")
                .long("dec")
                .required(true)
                .help("Declination, degrees")
                .value_parser(value_parser!(f64))
                .action(ArgAction::Set),
        )
    }
    pub fn ra(matches: &ArgMatches) -> f64 {
        *matches.get_one::<f64>("ra").unwrap()
    }
    pub fn dec(matches: &ArgMatches) -> f64 {
        *matches.get_one::<f64>("dec").unwrap()
    }

    //fp add_radius_arg
    pub fn add_radius_arg(cmd: Command) -> Command {
        cmd.arg(
            Arg::new("radius")
                .long("radius")
                .short('r')
                .required(true)
                .help("Cone radius, degrees")
                .value_parser(value_parser!(f64))
                .action(ArgAction::Set),
        )
    }
    pub fn radius(matches: &ArgMatches) -> f64 {
        *matches.get_one::<f64>("radius").unwrap()
    }

    //fp add_max_results_arg
    pub fn add_max_results_arg(cmd: Command) -> Command {
        cmd.arg(
            Arg::new("max_results")
                .long("max-results")
                .help("Stop once this many records are found (0 = unlimited)")
                .value_parser(value_parser!(usize))
                .action(ArgAction::Set),
        )
    }
    pub fn max_results(matches: &ArgMatches) -> usize {
        *matches.get_one::<usize>("max_results").unwrap_or(&0)
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cmd = Command::new("gaia-catalog")
        .about("Local Gaia DR3 catalog engine: build and query a GAIA18V2 catalog")
        .version(env!("CARGO_PKG_VERSION"));

    let build_subcmd = Command::new("build")
        .about("Build a catalog from an upstream CSV extract")
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .required(true)
                .help("Upstream CSV file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("mag_limit")
                .long("mag-limit")
                .help("Drop records fainter than this g_mag")
                .value_parser(value_parser!(f64))
                .action(ArgAction::Set),
        );
    let build_subcmd = cmdline::add_catalog_arg(build_subcmd);

    let source_subcmd = Command::new("query-source")
        .about("Look up one star by source_id")
        .arg(
            Arg::new("source_id")
                .long("source-id")
                .required(true)
                .value_parser(value_parser!(u64))
                .action(ArgAction::Set),
        );
    let source_subcmd = cmdline::add_catalog_arg(source_subcmd);

    let cone_subcmd = Command::new("cone").about("Cone search");
    let cone_subcmd = cmdline::add_catalog_arg(cone_subcmd);
    let cone_subcmd = cmdline::add_radec_args(cone_subcmd);
    let cone_subcmd = cmdline::add_radius_arg(cone_subcmd);
    let cone_subcmd = cmdline::add_max_results_arg(cone_subcmd);

    let brightest_subcmd = Command::new("brightest").about("Brightest-N in a cone");
    let brightest_subcmd = cmdline::add_catalog_arg(brightest_subcmd);
    let brightest_subcmd = cmdline::add_radec_args(brightest_subcmd);
    let brightest_subcmd = cmdline::add_radius_arg(brightest_subcmd);
    let brightest_subcmd = brightest_subcmd.arg(
        Arg::new("n")
            .long("n")
            .short('n')
            .required(true)
            .value_parser(value_parser!(usize))
            .action(ArgAction::Set),
    );

    let count_subcmd = Command::new("count").about("Count stars in a cone");
    let count_subcmd = cmdline::add_catalog_arg(count_subcmd);
    let count_subcmd = cmdline::add_radec_args(count_subcmd);
    let count_subcmd = cmdline::add_radius_arg(count_subcmd);

    let cmd = cmd
        .subcommand(build_subcmd)
        .subcommand(source_subcmd)
        .subcommand(cone_subcmd)
        .subcommand(brightest_subcmd)
        .subcommand(count_subcmd);

    env_logger::init();
    let matches = cmd.get_matches();

    match matches.subcommand() {
        Some(("build", m)) => run_build(m),
        Some(("query-source", m)) => run_query_source(m),
        Some(("cone", m)) => run_cone(m),
        Some(("brightest", m)) => run_brightest(m),
        Some(("count", m)) => run_count(m),
        _ => Err(anyhow!("a subcommand is required (build, query-source, cone, brightest, count)")),
    }
}

fn run_build(m: &ArgMatches) -> Result<(), anyhow::Error> {
    #[cfg(feature = "csv")]
    {
        let input: PathBuf = m.get_one::<String>("input").unwrap().into();
        let output: PathBuf = cmdline::catalog(m).into();
        let mag_limit = m.get_one::<f64>("mag_limit").copied().unwrap_or(18.0);
        let upstream = gaia_catalog::builder::CsvUpstreamSource::new(input);
        let config = BuilderConfig { mag_limit, ..Default::default() };
        let stats = gaia_catalog::Builder::build(&upstream, &output, config)?;
        println!(
            "built {} ({} stars, {} chunks, {} pixels, {} duplicates removed, {} filtered, {:?})",
            output.display(),
            stats.total_stars,
            stats.total_chunks,
            stats.num_pixels,
            stats.duplicates_removed,
            stats.records_filtered,
            stats.build_duration
        );
        Ok(())
    }
    #[cfg(not(feature = "csv"))]
    {
        let _ = m;
        Err(anyhow!("CSV upstream support not compiled in; rebuild with --features csv"))
    }
}

fn run_query_source(m: &ArgMatches) -> Result<(), anyhow::Error> {
    let reader = CatalogReader::open(cmdline::catalog(m))?;
    let source_id = *m.get_one::<u64>("source_id").unwrap();
    match reader.query_by_source_id(source_id)? {
        Some(r) => println!("{r:?}"),
        None => println!("no star with source_id {source_id}"),
    }
    Ok(())
}

fn run_cone(m: &ArgMatches) -> Result<(), anyhow::Error> {
    let reader = CatalogReader::open(cmdline::catalog(m))?;
    let results = reader.query_cone(cmdline::ra(m), cmdline::dec(m), cmdline::radius(m), cmdline::max_results(m))?;
    for r in &results {
        println!("{} {:.6} {:.6} {:.3}", r.source_id, r.ra, r.dec, r.g_mag);
    }
    println!("{} stars", results.len());
    Ok(())
}

fn run_brightest(m: &ArgMatches) -> Result<(), anyhow::Error> {
    let reader = CatalogReader::open(cmdline::catalog(m))?;
    let n = *m.get_one::<usize>("n").unwrap();
    let results = reader.query_brightest(cmdline::ra(m), cmdline::dec(m), cmdline::radius(m), n)?;
    for r in &results {
        println!("{} {:.6} {:.6} {:.3}", r.source_id, r.ra, r.dec, r.g_mag);
    }
    Ok(())
}

fn run_count(m: &ArgMatches) -> Result<(), anyhow::Error> {
    let reader = CatalogReader::open(cmdline::catalog(m))?;
    let count = reader.count_in_cone(cmdline::ra(m), cmdline::dec(m), cmdline::radius(m))?;
    println!("{count}");
    Ok(())
}
