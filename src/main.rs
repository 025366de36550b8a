use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use unload::physics::BoxPlacement;
use unload::planning::{
    inflate_along_roadmap, pairwise_intersections, simplify_low_connectivity, Prm, RegionGenerator,
    SampledInflation,
};
use unload::scene::{robot_only_scene, unloading_scene, SceneKind};
use unload::viz::{
    connectivity_dot, degree_histogram, render_histogram, render_region_points, DirectorySink,
    VisualizationSink,
};
use unload::{BoxPileEngine, RegionCollection, RobotModel, ScenarioDriver, SceneCollisionChecker, Settings};

const ARM_BASE_LINK: &str = "base_link";
const ARM_TIP_LINK: &str = "arm_eef";

/// Drops boxes into the trailer and covers the arm's free configuration
/// space with convex regions.
#[derive(Parser, Debug)]
#[command(name = "unload", version)]
struct Cli {
    /// Integer randomization seed.
    #[arg(long, default_value_t = 0)]
    randomization: u64,

    /// Settings file. Falls back to $UNLOAD_CONFIG, then to the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::from_yaml_file(path)?,
        None => Settings::from_env()?,
    };
    fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("creating {}", settings.output_dir.display()))?;

    for (file, scene) in [
        (
            "scene.dmd.yaml",
            unloading_scene(&settings.paths, &settings.q_nominal, settings.num_boxes, SceneKind::Simulation)?,
        ),
        (
            "iris_scene.dmd.yaml",
            unloading_scene(&settings.paths, &settings.q_nominal, settings.num_boxes, SceneKind::Iris)?,
        ),
        ("robot.dmd.yaml", robot_only_scene(&settings.paths, &settings.q_nominal)?),
    ] {
        let path = settings.output_dir.join(file);
        fs::write(&path, scene.to_yaml()?).with_context(|| format!("writing {}", path.display()))?;
    }

    // boxes
    let mut rng = ChaCha8Rng::seed_from_u64(cli.randomization);
    let placement = if settings.randomize_boxes {
        BoxPlacement::Random {
            bounds: settings.placement.clone(),
            edge: settings.box_edge,
        }
    } else {
        BoxPlacement::precomputed()?
    };
    let engine = BoxPileEngine::for_scene(settings.trailer.clone(), settings.engine_options(), settings.num_boxes);
    let mut driver = ScenarioDriver::new(engine, settings.phases.clone(), settings.robot_pose(), settings.num_boxes);
    let box_poses = driver.settle_boxes(&placement, &mut rng)?;
    info!(seed = cli.randomization, boxes = box_poses.len(), "boxes settled");

    // regions
    let chain = RobotModel::from_urdf(&settings.paths.robot_arm)?
        .chain(ARM_BASE_LINK, ARM_TIP_LINK)?
        .with_base_pose(settings.robot_pose());
    let domain = chain.domain()?;
    let checker = SceneCollisionChecker::for_unloading(
        chain.clone(),
        &settings.trailer,
        &box_poses,
        settings.box_edge,
        settings.checker.clone(),
    );
    let mut generator = RegionGenerator::new(checker, SampledInflation::new(), domain.clone(), settings.clique_cover.clone());

    let mut regions = RegionCollection::new();
    for (index, round) in settings.rounds.iter().enumerate() {
        round.apply(generator.options_mut());
        let prior = round.use_prior.then_some(settings.region_file.as_path());
        let (collection, report) = generator.run_round(prior, &settings.region_file)?;
        info!(
            round = index,
            iterations = report.iterations,
            coverage = report.coverage,
            regions = report.num_regions,
            new_regions = report.new_regions,
            "round finished"
        );
        regions = collection;
    }

    // diagnostics
    let intersections = pairwise_intersections(&regions)?;
    let simplified = simplify_low_connectivity(&regions, &settings.postprocess)?;
    let faces = |c: &RegionCollection| c.regions().map(|r| r.num_faces()).sum::<usize>();
    info!(before = faces(&regions), after = faces(&simplified), "simplified face count");

    let mut sink = DirectorySink::new(&settings.output_dir)?;
    sink.set_text("intersections/histogram", &render_histogram(&degree_histogram(&intersections)));
    sink.set_text("intersections/graph", &connectivity_dot(&intersections));
    render_region_points(
        &mut sink,
        &chain,
        &regions,
        settings.visualization_samples,
        settings.visualization_seed,
    )?;

    if settings.run_prm {
        let prm = Prm::build(generator.checker(), &domain, &settings.prm)?;
        let prm_regions = inflate_along_roadmap(&prm, generator.checker(), &SampledInflation::new(), &domain, &settings.prm)?;
        prm_regions.save(settings.prm_region_file())?;
        info!(regions = prm_regions.len(), "roadmap inflation finished");
    }

    driver.finish()?;
    info!(output = %settings.output_dir.display(), "done");
    Ok(())
}
