use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lessonkit::cluster::review::{self, ReviewFormat};
use lessonkit::cluster::{self, ClusterRecord, compare, input, merge};
use lessonkit::config::{Config, DEFAULT_CONFIG_FILE};
use lessonkit::embed;
use lessonkit::index::{self, BuildOptions, LessonIndex, hasher};
use lessonkit::recommend::weights::{self, Bookmark};
use lessonkit::recommend::{self, Combine, Mode, Pick, RecommendError, RecommendParams, Scored, SeedSet, shown};
use lessonkit::{lesson_units, lessons, store, verse_map};

#[derive(Parser)]
#[command(name = "lessonkit", version, about = "Lesson curation: cluster, index and recommend")]
struct Cli {
    /// Config file (default: ./lessonkit.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group raw candidate lessons into near-duplicate clusters
    Cluster {
        /// Candidates JSONL ({lesson_id, raw|text})
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Cosine threshold (default from config)
        #[arg(long)]
        threshold: Option<f32>,
        /// Only read the first N candidates
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Re-cluster curated representatives from a human pass
    Recluster {
        /// Human-pass JSONL ({cluster_id, text})
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Merge several clusters into one
    Merge {
        #[arg(long)]
        input: PathBuf,
        /// Output file (default: overwrite input)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Cluster ids to merge
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        ids: Vec<i64>,
        /// Id of the merged cluster (default: smallest of --ids)
        #[arg(long)]
        target: Option<i64>,
        /// Drop candidates whose normalized text repeats
        #[arg(long)]
        dedupe: bool,
        /// Renumber clusters to 0..N-1 afterwards
        #[arg(long)]
        reindex: bool,
    },
    /// Markdown diff of two clusters files
    Compare {
        a: PathBuf,
        b: PathBuf,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Items listed per section
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Render one clusters file for curator review
    Review {
        #[arg(long)]
        input: PathBuf,
        /// Output path (default: <input stem>_review.<format> next to the input)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ReviewFormat::Md)]
        format: ReviewFormat,
    },
    /// Extract lessons.txt from a human pass
    Lessons {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Build the lesson index (skipped when lessons are unchanged)
    Embed {
        /// One lesson per line
        #[arg(long)]
        lessons: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Rebuild even if the content hash matches
        #[arg(long)]
        force: bool,
    },
    /// Nearest lessons to a free-text query
    Search {
        query: String,
        #[arg(long)]
        index: PathBuf,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
    },
    /// Trace each indexed lesson back to its verse spans (lesson_units.json)
    LessonUnits {
        #[arg(long)]
        index: PathBuf,
        /// Second human pass ({old_cluster_id, text})
        #[arg(long)]
        humanpass: PathBuf,
        /// First-pass clusters (member_lesson_ids or candidates with lesson_id)
        #[arg(long)]
        clusters: PathBuf,
        /// Candidates JSONL ({lesson_id, unit: {chapter, start, end}})
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Build verse → lesson lookup tables from lesson_units.json
    VerseMap {
        #[arg(long)]
        units: PathBuf,
        /// Verse → lowest covering lesson
        #[arg(long)]
        out: PathBuf,
        /// Verse → every covering lesson
        #[arg(long)]
        all_hits_out: Option<PathBuf>,
    },
    /// Recommend next lessons from bookmarks
    Recommend(RecommendArgs),
    /// Write the effective configuration to a TOML file
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RecommendArgs {
    #[arg(long, value_enum, default_value_t = Mode::Aggregate)]
    mode: Mode,
    #[arg(long)]
    index: PathBuf,
    /// verse_to_lesson.json from `verse-map`
    #[arg(long)]
    verse_map: PathBuf,
    /// Bookmarked verse keys like 2:47
    #[arg(long, num_args = 1..)]
    bookmarks: Vec<String>,
    /// [{verse, ts}] for recency weighting
    #[arg(long)]
    bookmarks_json: Option<PathBuf>,
    /// [{index, ts}] of lessons already shown
    #[arg(long)]
    shown_json: Option<PathBuf>,
    #[arg(long)]
    random_seed: Option<u64>,
    #[arg(long)]
    json_out: Option<PathBuf>,

    #[arg(long)]
    min_cos: Option<f32>,
    #[arg(long)]
    max_similar: Option<f32>,
    #[arg(long)]
    topk_per_seed: Option<usize>,
    #[arg(long)]
    overall_topk: Option<usize>,
    /// Allow seed lessons in the results
    #[arg(long)]
    include_same: bool,
    #[arg(long, value_enum)]
    combine: Option<Combine>,
    #[arg(long)]
    tau_days: Option<f64>,
    #[arg(long)]
    w_min: Option<f64>,
    #[arg(long)]
    band_low_pct: Option<f64>,
    #[arg(long)]
    band_high_pct: Option<f64>,
    #[arg(long)]
    no_repeat_days: Option<f64>,
    #[arg(long)]
    topm_per_cluster: Option<usize>,
    /// If > 0, also pick one result scoring at least this much
    #[arg(long)]
    random_pick_threshold: Option<f32>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Cluster { input, out, threshold, limit } => {
            let items = input::load_candidates(&input, limit)?;
            run_cluster(&config, &items, threshold.unwrap_or(config.cluster.threshold), &out)
        }
        Commands::Recluster { input, out, threshold } => {
            let items = input::load_humanpass(&input)?;
            run_cluster(
                &config,
                &items,
                threshold.unwrap_or(config.cluster.recluster_threshold),
                &out,
            )
        }
        Commands::Merge { input, out, ids, target, dedupe, reindex } => {
            let records: Vec<ClusterRecord> = store::read_jsonl(&input)?;
            let mut clusters = merge::merge_clusters(merge::to_map(records), &ids, target, dedupe)?;
            if reindex {
                clusters = merge::reindex(clusters);
            }
            let out = out.unwrap_or(input);
            let n = store::write_jsonl(&out, &merge::to_records(clusters))?;
            info!(clusters = n, path = %out.display(), "merged");
            Ok(())
        }
        Commands::Compare { a, b, out, limit } => {
            let ra: Vec<ClusterRecord> = store::read_jsonl(&a)?;
            let rb: Vec<ClusterRecord> = store::read_jsonl(&b)?;
            let report = compare::render_markdown(
                &a.display().to_string(),
                &b.display().to_string(),
                &compare::diff(&ra, &rb),
                limit,
            );
            match out {
                Some(path) => {
                    store::write_text(&path, &report)?;
                    info!(path = %path.display(), "wrote comparison report");
                }
                None => print!("{report}"),
            }
            Ok(())
        }
        Commands::Review { input, out, format } => {
            let records: Vec<ClusterRecord> = store::read_jsonl(&input)?;
            let out = out.unwrap_or_else(|| review_path(&input, format));
            store::write_text(&out, &review::render(&records, format))?;
            info!(clusters = records.len(), path = %out.display(), "wrote review");
            Ok(())
        }
        Commands::Lessons { input, out } => {
            let texts = lessons::extract_texts(&input)?;
            store::write_text(&out, &lessons::render(&texts))?;
            info!(lessons = texts.len(), path = %out.display(), "wrote lessons");
            Ok(())
        }
        Commands::Embed { lessons, out, force } => run_embed(&config, &lessons, &out, force),
        Commands::Search { query, index, k } => run_search(&config, &query, &index, k),
        Commands::LessonUnits { index, humanpass, clusters, candidates, out } => {
            let index = LessonIndex::load(&index)?;
            let mapping = lesson_units::build(
                &index.texts,
                &lesson_units::load_pass(&humanpass)?,
                &lesson_units::load_cluster_members(&clusters)?,
                &lesson_units::load_candidate_units(&candidates)?,
            );
            store::write_json(&out, &mapping, false)?;
            info!(lessons = mapping.len(), path = %out.display(), "wrote lesson units");
            Ok(())
        }
        Commands::VerseMap { units, out, all_hits_out } => {
            let entries: Vec<verse_map::LessonUnits> = store::read_json(&units)?;
            let maps = verse_map::build(&entries);
            store::write_json(&out, &maps.primary, true)?;
            if let Some(path) = all_hits_out {
                store::write_json(&path, &maps.all_hits, true)?;
            }
            info!(lessons = entries.len(), verses = maps.primary.len(), "built verse map");
            Ok(())
        }
        Commands::Recommend(args) => run_recommend(&config, args),
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn review_path(input: &Path, format: ReviewFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{stem}_review.{}", format.extension()))
}

fn run_cluster(config: &Config, items: &[cluster::TextItem], threshold: f32, out: &Path) -> Result<()> {
    let embedder = embed::from_config(&config.embed)?;
    let run = cluster::cluster_texts(items, embedder.as_ref(), threshold)?;
    let records = cluster::to_records(items, &run.clusters);
    store::write_jsonl(out, &records)?;

    let singletons = run.clusters.iter().filter(|c| c.len() == 1).count();
    info!(
        items = items.len(),
        clusters = records.len(),
        singletons,
        threshold,
        path = %out.display(),
        "wrote clusters"
    );
    if !run.failed.is_empty() {
        for (idx, err) in &run.failed {
            warn!(item = idx, error = %err, "left out of clusters");
        }
        warn!(failed = run.failed.len(), "some items failed to embed and were left out");
    }
    Ok(())
}

fn run_embed(config: &Config, lessons_path: &Path, out: &Path, force: bool) -> Result<()> {
    let lessons = index::read_lessons(lessons_path)?;
    let embedder = embed::from_config(&config.embed)?;

    if !force && out.exists() {
        match LessonIndex::load(out) {
            Ok(existing)
                if existing.content_hash == hasher::content_hash(&lessons)
                    && existing.model == embedder.model_name() =>
            {
                info!(path = %out.display(), "lessons unchanged; index is up to date");
                return Ok(());
            }
            Ok(_) => info!("lessons or model changed; rebuilding index"),
            Err(e) => warn!(error = %format!("{e:#}"), "existing index unreadable; rebuilding"),
        }
    }

    let opts = BuildOptions {
        passage_prefix: &config.embed.passage_prefix,
        batch_size: config.embed.batch_size,
        source: Some(lessons_path.display().to_string()),
    };
    let built = index::build_index(lessons, embedder.as_ref(), &opts)?;
    built.save(out)?;
    println!("Indexed {} lessons ({} dims) → {}", built.len(), built.dimensions, out.display());
    Ok(())
}

fn run_search(config: &Config, query: &str, index_path: &Path, k: usize) -> Result<()> {
    let index = LessonIndex::load(index_path)?;
    let embedder = embed::from_config(&config.embed)?;
    if embedder.model_name() != index.model {
        warn!(index = %index.model, embedder = embedder.model_name(), "query model differs from index model");
    }
    let q = embedder
        .embed(&format!("{}{query}", config.embed.query_prefix))
        .context("embedding query")?;
    if q.len() != index.dimensions {
        bail!(
            "query has {} dimensions but the index has {}",
            q.len(),
            index.dimensions
        );
    }

    for (rank, (id, score)) in index.top_k(&q, k).into_iter().enumerate() {
        println!("{:>2}. [{id}] {score:.3}  {}", rank + 1, index.text(id));
    }
    Ok(())
}

fn recommend_params(config: &Config, args: &RecommendArgs) -> RecommendParams {
    let mut p = config.recommend.params();
    if let Some(v) = args.min_cos {
        p.min_cos = v;
    }
    if let Some(v) = args.max_similar {
        p.max_similar = v;
    }
    if let Some(v) = args.topk_per_seed {
        p.topk_per_seed = v;
    }
    if let Some(v) = args.overall_topk {
        p.overall_topk = v;
    }
    if args.include_same {
        p.exclude_same = false;
    }
    if let Some(v) = args.combine {
        p.combine = v;
    }
    if let Some(v) = args.band_low_pct {
        p.band_low_pct = v;
    }
    if let Some(v) = args.band_high_pct {
        p.band_high_pct = v;
    }
    if let Some(v) = args.topm_per_cluster {
        p.topm_per_cluster = v;
    }
    if let Some(v) = args.random_pick_threshold {
        p.random_pick_threshold = (v > 0.0).then_some(v);
    }
    p
}

#[derive(Serialize)]
struct Row<'a> {
    index: usize,
    score: f32,
    text: &'a str,
}

#[derive(Serialize)]
struct SeedRow<'a> {
    index: usize,
    weight: f64,
    text: &'a str,
}

#[derive(Serialize)]
struct PickRow<'a> {
    #[serde(flatten)]
    pick: &'a Pick,
    text: &'a str,
}

#[derive(Serialize)]
struct Report<'a> {
    mode: Mode,
    params: &'a RecommendParams,
    seeds: Vec<SeedRow<'a>>,
    results: Vec<Row<'a>>,
    pick: Option<PickRow<'a>>,
    random_pick: Option<Row<'a>>,
}

fn row<'a>(index: &'a LessonIndex, s: &Scored) -> Row<'a> {
    Row {
        index: s.index,
        score: s.score,
        text: index.text(s.index),
    }
}

fn run_recommend(config: &Config, args: RecommendArgs) -> Result<()> {
    let params = recommend_params(config, &args);
    let tau_days = args.tau_days.unwrap_or(config.recommend.tau_days);
    let w_min = args.w_min.unwrap_or(config.recommend.w_min);
    let no_repeat_days = args.no_repeat_days.unwrap_or(config.recommend.no_repeat_days);

    let index = LessonIndex::load(&args.index)?;
    let verse_to_lesson: BTreeMap<String, usize> = store::read_json(&args.verse_map)?;
    let timed: Vec<Bookmark> = match &args.bookmarks_json {
        Some(path) => store::read_json(path)?,
        None => Vec::new(),
    };
    let seeds = weights::seeds_from_bookmarks(&args.bookmarks, &timed, &verse_to_lesson, tau_days, w_min);
    let shown = shown::load(args.shown_json.as_deref(), Utc::now(), no_repeat_days);

    let mut rng = match args.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let rec = match recommend::recommend(&index, &seeds, &shown, args.mode, &params, &mut rng) {
        Ok(rec) => rec,
        Err(RecommendError::NoSeeds) => {
            warn!("no seeds from bookmarks; nothing to recommend");
            if let Some(path) = &args.json_out {
                let nothing = recommend::Recommendation::default();
                let empty = report(&index, &SeedSet::default(), args.mode, &params, &nothing);
                store::write_json(path, &empty, true)?;
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let out = report(&index, &seeds, args.mode, &params, &rec);
    println!("Seeds:");
    for s in &out.seeds {
        println!("  [{}] w={:.3}  {}", s.index, s.weight, s.text);
    }
    println!("Recommendations ({:?}):", args.mode);
    for (rank, r) in out.results.iter().enumerate() {
        println!("{:>2}. [{}] {:.3}  {}", rank + 1, r.index, r.score, r.text);
    }
    if let Some(p) = &out.pick {
        let score = p.pick.score.map_or("-".to_string(), |s| format!("{s:.3}"));
        match p.pick.fallback {
            Some(reason) => println!("Pick: [{}] {score} (fallback: {reason:?})  {}", p.pick.index, p.text),
            None => println!("Pick: [{}] {score}  {}", p.pick.index, p.text),
        }
    }
    if let Some(r) = &out.random_pick {
        println!("Random pick: [{}] {:.3}  {}", r.index, r.score, r.text);
    }

    if let Some(path) = &args.json_out {
        store::write_json(path, &out, true)?;
        info!(path = %path.display(), "wrote recommendation report");
    }
    Ok(())
}

fn report<'a>(
    index: &'a LessonIndex,
    seeds: &SeedSet,
    mode: Mode,
    params: &'a RecommendParams,
    rec: &'a recommend::Recommendation,
) -> Report<'a> {
    Report {
        mode,
        params,
        seeds: seeds
            .ids
            .iter()
            .zip(&seeds.weights)
            .map(|(&i, &weight)| SeedRow {
                index: i,
                weight,
                text: index.text(i),
            })
            .collect(),
        results: rec.results.iter().map(|s| row(index, s)).collect(),
        pick: rec.pick.as_ref().map(|pick| PickRow {
            pick,
            text: index.text(pick.index),
        }),
        random_pick: rec.random_pick.as_ref().map(|s| row(index, s)),
    }
}
