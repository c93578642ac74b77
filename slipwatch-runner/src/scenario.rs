//! Per-area scenario pipeline.
//!
//! For every alert area the time range is walked newest first: source
//! folders are discovered for each step, the freshest file time available for
//! both rain and soil moisture is read, and the reads are merged into
//! per-source accumulators. The accumulators are then aligned, gap-filled and
//! persisted as parquet tables behind a JSON manifest. Once every area is
//! organized, their pivot times must agree; only then are the analysis tables
//! joined and exported.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use slipwatch_core::analytics::{
    compute_statistics, rolling_accumulated, rolling_averaged, AnalyticsError, Metric,
};
use slipwatch_core::data::{
    align, fill_missing_days, fill_nodata, join_sources, merge_by_time, read_source, AlignError,
    AlignInput, AlignmentSummary, FileMemo, GapFillError, GapFillOptions, JoinError, JoinInput,
    JoinOptions, MergeError, MergeOptions, ReadError,
};
use slipwatch_core::time::files::{
    common_time_index, filename_timestamps, files_with_tags, validate_time_index, FilesError,
    DEFAULT_FILE_TIME_FORMAT,
};
use slipwatch_core::time::tokens::{detect_token, expand_home, resolve_paths, SortOrder, TokenError};
use slipwatch_core::time::{set_time, TimeError, TimeSetup};
use slipwatch_core::table::{
    filter_rows, numeric_series, time_bounds, time_values, times, TableError,
};
use slipwatch_core::{PathKey, PathTemplate};

use crate::config::{hh_mm, AreaConfig, ConfigError, ScenarioConfig, SourceConfig};
use crate::export::{write_frame_csv, ExportError, ExportOptions};
use crate::store::{AncillaryStore, StoreError};

const TIME_COL: &str = "time";
const DOMAIN_COL: &str = "domain";
const DATASET_SLOTS: [&str; 3] = ["rain", "soil_moisture", "soil_slips"];

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Files(#[from] FilesError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Align(#[from] AlignError),

    #[error(transparent)]
    GapFill(#[from] GapFillError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("source '{0}' folder template has no search placeholder")]
    MissingSearchToken(String),

    #[error("area '{0}' has no time window to analyze")]
    NoTimeWindow(String),

    #[error("time pivot is not unique across areas: {pivots:?}")]
    PivotMismatch {
        pivots: BTreeMap<String, Option<NaiveDateTime>>,
    },
}

/// Per-area pipeline states, logged at debug level as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaStage {
    NotStarted,
    DiscoverTimeWindows,
    ReadSources,
    Merge,
    Align,
    PersistDatasets,
    Analyze,
    PersistAnalysis,
    Done,
}

fn enter(area: &str, stage: AreaStage) {
    debug!(area, stage = ?stage, "stage");
}

/// What was found for one step of the time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub time_step: NaiveDateTime,
    pub folder_tag: Option<NaiveDateTime>,
    pub file_tag: Option<NaiveDateTime>,
    pub time_ref: NaiveDateTime,
}

/// Organized datasets for one area; persisted per run time.
#[derive(Debug, Clone)]
pub struct AreaDatasets {
    pub area: String,
    pub pivot: Option<NaiveDateTime>,
    pub summary: Vec<StepSummary>,
    pub rain: Option<DataFrame>,
    pub soil_moisture: Option<DataFrame>,
    pub soil_slips: Option<DataFrame>,
    pub alignment: AlignmentSummary,
}

impl AreaDatasets {
    fn tables(&self) -> [(&'static str, Option<&DataFrame>); 3] {
        [
            (DATASET_SLOTS[0], self.rain.as_ref()),
            (DATASET_SLOTS[1], self.soil_moisture.as_ref()),
            (DATASET_SLOTS[2], self.soil_slips.as_ref()),
        ]
    }
}

/// JSON document stored at the datasets path. Each listed table sits next
/// to it as `{stem}.{slot}.parquet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetsManifest {
    area: String,
    pivot: Option<NaiveDateTime>,
    summary: Vec<StepSummary>,
    alignment: AlignmentSummary,
    tables: Vec<String>,
}

fn table_path(manifest: &Path, slot: &str) -> PathBuf {
    manifest.with_extension(format!("{slot}.parquet"))
}

/// Newest rolling values per window and soil-moisture statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaIndicators {
    pub rain_accumulated: BTreeMap<String, Option<f64>>,
    pub rain_averaged: BTreeMap<String, Option<f64>>,
    pub soil_moisture: BTreeMap<Metric, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaReport {
    pub area: String,
    pub rows: usize,
    pub destination: PathBuf,
    pub exported: bool,
    pub indicators: Option<AreaIndicators>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub time_run: NaiveDateTime,
    pub pivot: NaiveDateTime,
    pub areas: Vec<AreaReport>,
}

#[derive(Debug, Default)]
struct StepFrames {
    rain: Option<DataFrame>,
    soil_moisture: Option<DataFrame>,
    soil_slips: Option<DataFrame>,
}

impl StepFrames {
    fn complete(&self) -> bool {
        self.rain.is_some() && self.soil_moisture.is_some() && self.soil_slips.is_some()
    }
}

/// The single pivot shared by every area. Any disagreement, or an area with
/// no pivot at all, is fatal.
pub fn reconcile_pivot(
    pivots: &BTreeMap<String, Option<NaiveDateTime>>,
) -> Result<NaiveDateTime, ScenarioError> {
    let distinct: BTreeSet<Option<NaiveDateTime>> = pivots.values().copied().collect();
    if distinct.len() == 1 {
        if let Some(Some(pivot)) = distinct.first() {
            return Ok(*pivot);
        }
    }
    error!(?pivots, "time pivot is not unique");
    Err(ScenarioError::PivotMismatch {
        pivots: pivots.clone(),
    })
}

/// One invocation of the pipeline for a run time.
pub struct Scenario<'a> {
    config: &'a ScenarioConfig,
    setup: TimeSetup,
    store: AncillaryStore,
}

impl<'a> Scenario<'a> {
    pub fn new(config: &'a ScenarioConfig, time_run: NaiveDateTime) -> Result<Self, ScenarioError> {
        let setup = set_time(time_run, &config.time.window_spec()?)?;
        let store = AncillaryStore::new(expand_home(&config.ancillary.folder));
        Ok(Self {
            config,
            setup,
            store,
        })
    }

    pub fn setup(&self) -> &TimeSetup {
        &self.setup
    }

    pub fn store(&self) -> &AncillaryStore {
        &self.store
    }

    fn time_ref(&self) -> NaiveDateTime {
        self.setup.time_run
    }

    fn render(&self, template: &PathTemplate, key: &PathKey) -> String {
        template.render(&self.config.tags, &key.values())
    }

    pub fn datasets_path(&self, area: &str) -> PathBuf {
        let key = PathKey::for_run(self.setup.time_run).area(area);
        PathBuf::from(self.render(&PathTemplate::new(self.config.ancillary.datasets.clone()), &key))
    }

    pub fn analysis_path(&self, area: &str, pivot: NaiveDateTime) -> PathBuf {
        let key = PathKey::for_run(pivot).area(area);
        PathBuf::from(self.render(&PathTemplate::new(self.config.ancillary.analysis.clone()), &key))
    }

    pub fn destination_path(&self, area: &str, pivot: NaiveDateTime) -> PathBuf {
        let key = PathKey::for_run(pivot).area(area).destination(pivot);
        expand_home(&self.render(&self.config.destination.path_template(), &key))
    }

    // ── Datasets ─────────────────────────────────────────────────────

    /// Persisted datasets of an area for this run, `None` when absent or
    /// when a listed table has gone missing.
    pub fn load_datasets(&self, area: &str) -> Result<Option<AreaDatasets>, ScenarioError> {
        let rel = self.datasets_path(area);
        let Some(manifest) = self.store.read::<DatasetsManifest>(&rel)? else {
            return Ok(None);
        };
        let mut tables = BTreeMap::new();
        for slot in &manifest.tables {
            let path = table_path(&rel, slot);
            let Some(frame) = self.store.read_frame(&path)? else {
                warn!(area, table = %path.display(), "datasets table missing, rebuilding");
                return Ok(None);
            };
            tables.insert(slot.clone(), frame);
        }
        Ok(Some(AreaDatasets {
            area: manifest.area,
            pivot: manifest.pivot,
            summary: manifest.summary,
            rain: tables.remove(DATASET_SLOTS[0]),
            soil_moisture: tables.remove(DATASET_SLOTS[1]),
            soil_slips: tables.remove(DATASET_SLOTS[2]),
            alignment: manifest.alignment,
        }))
    }

    fn save_datasets(&self, datasets: &AreaDatasets) -> Result<(), ScenarioError> {
        let rel = self.datasets_path(&datasets.area);
        let mut tables = Vec::new();
        for (slot, frame) in datasets.tables() {
            if let Some(frame) = frame {
                self.store.write_frame(&table_path(&rel, slot), frame)?;
                tables.push(slot.to_string());
            }
        }
        let manifest = DatasetsManifest {
            area: datasets.area.clone(),
            pivot: datasets.pivot,
            summary: datasets.summary.clone(),
            alignment: datasets.alignment.clone(),
            tables,
        };
        self.store.write(&rel, &manifest)?;
        Ok(())
    }

    /// Remove the manifest and its tables. True when the manifest existed.
    fn remove_datasets(&self, area: &str) -> Result<bool, ScenarioError> {
        let rel = self.datasets_path(area);
        for slot in DATASET_SLOTS {
            self.store.remove(&table_path(&rel, slot))?;
        }
        Ok(self.store.remove(&rel)?)
    }

    // ── Organize ─────────────────────────────────────────────────────

    /// Discover, read, merge, align and persist one area's sources, or
    /// reuse the persisted datasets for this run.
    pub fn organize_area(&self, area: &AreaConfig) -> Result<AreaDatasets, ScenarioError> {
        let _span = info_span!("area", name = %area.name).entered();
        enter(&area.name, AreaStage::NotStarted);

        if self.config.flags.update_ancillary_datasets && self.remove_datasets(&area.name)? {
            info!(path = %self.datasets_path(&area.name).display(), "datasets removed for update");
        }
        if let Some(cached) = self.load_datasets(&area.name)? {
            info!("datasets previously created, reusing");
            return Ok(cached);
        }

        let sources = &self.config.source;
        let time_ref = self.time_ref();
        let mut memo = FileMemo::new();
        let mut rain_acc: Option<DataFrame> = None;
        let mut sm_acc: Option<DataFrame> = None;
        let mut slips_acc: Option<DataFrame> = None;
        let mut summary = Vec::with_capacity(self.setup.time_range.len());

        for &time_step in &self.setup.time_range {
            enter(&area.name, AreaStage::DiscoverTimeWindows);
            let rain_folders = self.resolve_folders(&sources.rain, &area.name, time_step)?;
            let sm_folders = self.resolve_folders(&sources.soil_moisture, &area.name, time_step)?;
            let (Some(rain_folders), Some(sm_folders)) = (rain_folders, sm_folders) else {
                info!(%time_step, "source folders not available, step skipped");
                continue;
            };
            let folder_index = common_time_index(
                &rain_folders.keys().copied().collect::<Vec<_>>(),
                &sm_folders.keys().copied().collect::<Vec<_>>(),
            );

            enter(&area.name, AreaStage::ReadSources);
            let mut step = StepFrames::default();
            let mut folder_tag = None;
            let mut file_tag = None;
            let mut file_index: Option<Vec<NaiveDateTime>> = None;

            'folders: for &folder_time in &folder_index {
                if folder_time > time_ref {
                    debug!(%folder_time, %time_ref, "folder newer than the reference time, skipped");
                    continue;
                }
                let (Some(rain_dir), Some(sm_dir)) =
                    (rain_folders.get(&folder_time), sm_folders.get(&folder_time))
                else {
                    continue;
                };
                folder_tag = Some(folder_time);

                let rain_times = filename_timestamps(
                    &files_with_tags(rain_dir, &[area.name.as_str()])?,
                    time_ref,
                    sources.rain.file_time_index,
                    DEFAULT_FILE_TIME_FORMAT,
                );
                let sm_times = filename_timestamps(
                    &files_with_tags(sm_dir, &[area.name.as_str()])?,
                    time_ref,
                    sources.soil_moisture.file_time_index,
                    DEFAULT_FILE_TIME_FORMAT,
                );
                let (Some(rain_times), Some(sm_times)) = (rain_times, sm_times) else {
                    info!(%folder_time, "folder has no eligible files, skipped");
                    continue;
                };
                let common = common_time_index(
                    &rain_times.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
                    &sm_times.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
                );
                file_index = Some(common.clone());

                let extra = BTreeMap::from([(
                    "time_pivot".to_string(),
                    time_ref.format("%Y-%m-%d %H:%M").to_string(),
                )]);
                for &file_time in &common {
                    file_tag = Some(file_time);
                    let key = PathKey::for_run(time_ref)
                        .area(&area.name)
                        .search(folder_time)
                        .file(file_time);

                    let rain_path = rain_dir.join(self.render(
                        &sources.rain.file_template(),
                        &key.clone().variable(&sources.rain.spec.variable),
                    ));
                    let sm_path = sm_dir.join(self.render(
                        &sources.soil_moisture.file_template(),
                        &key.clone().variable(&sources.soil_moisture.spec.variable),
                    ));
                    let slips_path = expand_home(&self.render(
                        &sources.soil_slips.path_template(),
                        &key.clone().variable(&sources.soil_slips.spec.variable),
                    ));

                    step = StepFrames {
                        rain: self.read(&mut memo, &rain_path, &sources.rain, &extra)?,
                        soil_moisture: self.read(&mut memo, &sm_path, &sources.soil_moisture, &extra)?,
                        soil_slips: self.read(&mut memo, &slips_path, &sources.soil_slips, &BTreeMap::new())?,
                    };
                    if step.complete() {
                        break 'folders;
                    }
                    debug!(%file_time, "one or more sources missing, trying the next file time");
                }
            }

            enter(&area.name, AreaStage::Merge);
            if validate_time_index(Some(folder_index.as_slice()), file_index.as_deref()) {
                rain_acc = Some(merge_by_time(rain_acc, step.rain.as_ref(), &merge_options(&sources.rain))?);
                sm_acc = Some(merge_by_time(
                    sm_acc,
                    step.soil_moisture.as_ref(),
                    &merge_options(&sources.soil_moisture),
                )?);
                slips_acc = Some(merge_by_time(
                    slips_acc,
                    step.soil_slips.as_ref(),
                    &merge_options(&sources.soil_slips),
                )?);
            } else {
                warn!(%time_step, "source data not available for this step");
            }

            summary.push(StepSummary {
                time_step,
                folder_tag,
                file_tag,
                time_ref,
            });
        }

        let mut rain_acc = rain_acc.filter(|f| f.height() > 0);
        let mut sm_acc = sm_acc.filter(|f| f.height() > 0);
        let slips_acc = slips_acc.filter(|f| f.height() > 0);
        keep_common_times(&mut rain_acc, &mut sm_acc)?;

        enter(&area.name, AreaStage::Align);
        let flags = self.config.alignment;
        let alignment = align(
            self.setup.time_run,
            &self.setup.time_range,
            &[
                AlignInput {
                    name: &sources.rain.spec.variable,
                    frame: rain_acc.as_ref(),
                    enabled: flags.use_rain,
                },
                AlignInput {
                    name: &sources.soil_moisture.spec.variable,
                    frame: sm_acc.as_ref(),
                    enabled: flags.use_soil_moisture,
                },
                AlignInput {
                    name: &sources.soil_slips.spec.variable,
                    frame: slips_acc.as_ref(),
                    enabled: flags.use_soil_slips,
                },
            ],
            TIME_COL,
        )?;

        let range_start = self.setup.first().map(|t| t.date());
        let fill_opts = self.gap_fill_options(range_start, None)?;
        let rain_acc = rain_acc.map(|f| fill_missing_days(&f, &fill_opts)).transpose()?;
        let sm_acc = sm_acc.map(|f| fill_missing_days(&f, &fill_opts)).transpose()?;

        let pivot = summary.iter().filter_map(|s| s.file_tag).max();
        let datasets = AreaDatasets {
            area: area.name.clone(),
            pivot,
            summary,
            rain: rain_acc,
            soil_moisture: sm_acc,
            soil_slips: slips_acc,
            alignment,
        };

        enter(&area.name, AreaStage::PersistDatasets);
        self.save_datasets(&datasets)?;
        info!(pivot = ?datasets.pivot, "datasets organized");
        Ok(datasets)
    }

    /// Existing folders for one source at `time_step`, keyed by the time they encode.
    fn resolve_folders(
        &self,
        source: &SourceConfig,
        area: &str,
        time_step: NaiveDateTime,
    ) -> Result<Option<BTreeMap<NaiveDateTime, PathBuf>>, ScenarioError> {
        let key = PathKey::for_run(self.time_ref())
            .area(area)
            .variable(&source.spec.variable);
        let template = self.render(&source.folder_template(), &key);
        let Some(token) = detect_token(&template, &self.config.tags)? else {
            return Err(ScenarioError::MissingSearchToken(source.spec.variable.clone()));
        };
        let Some(format) = self.config.tags.get(&token) else {
            return Err(ScenarioError::MissingSearchToken(source.spec.variable.clone()));
        };
        let tokens = BTreeMap::from([(token.clone(), format.clone())]);
        let resolved = resolve_paths(&template, &tokens, time_step, format, SortOrder::Descending)?;
        Ok(resolved.map(|paths| paths.into_iter().collect()))
    }

    fn read(
        &self,
        memo: &mut FileMemo,
        path: &Path,
        source: &SourceConfig,
        extra: &BTreeMap<String, String>,
    ) -> Result<Option<DataFrame>, ScenarioError> {
        if !memo.get_or_probe(path) {
            debug!(variable = %source.spec.variable, path = %path.display(), "source file not found");
            return Ok(None);
        }
        let frame = read_source(path, &source.spec, extra, TIME_COL)?;
        if frame.is_none() {
            warn!(variable = %source.spec.variable, path = %path.display(), "source data not readable");
        }
        Ok(frame)
    }

    fn gap_fill_options(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<GapFillOptions, ScenarioError> {
        let fill = &self.config.fill;
        Ok(GapFillOptions {
            start_date: start,
            end_date: end,
            date_col: TIME_COL.into(),
            numeric_sentinel: fill.numeric_sentinel,
            string_sentinel: fill.string_sentinel.clone(),
            start_time: hh_mm("fill.start_time", &fill.start_time)?,
            end_time: fill
                .end_time
                .as_deref()
                .map(|t| hh_mm("fill.end_time", t))
                .transpose()?,
            ..GapFillOptions::default()
        })
    }

    // ── Analyze ──────────────────────────────────────────────────────

    /// Join the organized sources into the analysis table, or reuse the
    /// persisted one for this pivot.
    pub fn analyze_area(
        &self,
        area: &AreaConfig,
        datasets: &AreaDatasets,
        pivot: NaiveDateTime,
    ) -> Result<DataFrame, ScenarioError> {
        let _span = info_span!("area", name = %area.name).entered();
        enter(&area.name, AreaStage::Analyze);

        let flags = self.config.flags;
        let rel = self.analysis_path(&area.name, pivot);
        if (flags.update_ancillary_datasets || flags.update_ancillary_analysis)
            && self.store.remove(&rel)?
        {
            info!(path = %rel.display(), "analysis removed for update");
        }
        if let Some(cached) = self.store.read_frame(&rel)? {
            info!("analysis previously created, reusing");
            return Ok(cached);
        }

        let alignment = &datasets.alignment;
        let Some((start, end)) = alignment.time_period_data.or(alignment.time_period_ref) else {
            return Err(ScenarioError::NoTimeWindow(area.name.clone()));
        };
        let sources = &self.config.source;
        let opts = JoinOptions {
            time_label: TIME_COL.into(),
            domain_label: DOMAIN_COL.into(),
            domain_value: area.name.clone(),
            frequency: alignment.frequency().unwrap_or_else(|| Duration::days(1)),
            slips_placeholder_columns: merged_data_columns(&sources.soil_slips)?,
        };
        let joined = join_sources(
            start,
            end,
            JoinInput {
                variable: &sources.rain.spec.variable,
                frame: datasets.rain.as_ref(),
            },
            JoinInput {
                variable: &sources.soil_moisture.spec.variable,
                frame: datasets.soil_moisture.as_ref(),
            },
            JoinInput {
                variable: &sources.soil_slips.spec.variable,
                frame: datasets.soil_slips.as_ref(),
            },
            &opts,
        )?;

        let filled = fill_nodata(
            &joined,
            self.config.fill.numeric_sentinel,
            &self.config.fill.string_sentinel,
        )?;
        // days run from the start of the time range to the newest joined row
        let start = self.setup.first().map(|t| t.date());
        let end = time_bounds(&filled, TIME_COL)?.map(|(_, newest)| newest.date());
        let analysis = fill_missing_days(&filled, &self.gap_fill_options(start, end)?)?;

        enter(&area.name, AreaStage::PersistAnalysis);
        self.store.write_frame(&rel, &analysis)?;
        info!(rows = analysis.height(), "analysis computed");
        Ok(analysis)
    }

    /// Rolling rain indicators and soil-moisture statistics, when configured.
    pub fn indicators(&self, analysis: &DataFrame) -> Result<Option<AreaIndicators>, ScenarioError> {
        let Some(cfg) = &self.config.indicators else {
            return Ok(None);
        };
        let nodata = Some(self.config.fill.numeric_sentinel);
        let rain = numeric_series(analysis, TIME_COL, &cfg.rain_column, nodata)?;
        let sm = numeric_series(analysis, TIME_COL, &cfg.soil_moisture_column, nodata)?;

        let mut out = AreaIndicators::default();
        for window in &cfg.windows {
            let newest = |v: Vec<(NaiveDateTime, f64)>| v.first().map(|(_, x)| *x);
            out.rain_accumulated.insert(
                window.clone(),
                newest(rolling_accumulated(&rain, window, cfg.direction, true)?),
            );
            out.rain_averaged.insert(
                window.clone(),
                newest(rolling_averaged(&rain, window, cfg.direction, true)?),
            );
        }
        let metrics: Vec<&str> = cfg.metrics.iter().map(String::as_str).collect();
        out.soil_moisture = compute_statistics(&sm, &metrics);
        Ok(Some(out))
    }

    /// Export the analysis table unless it already exists.
    pub fn dump_area(
        &self,
        area: &AreaConfig,
        analysis: &DataFrame,
        pivot: NaiveDateTime,
    ) -> Result<(PathBuf, bool), ScenarioError> {
        let path = self.destination_path(&area.name, pivot);
        let flags = self.config.flags;
        let refresh = flags.update_destination
            || flags.update_ancillary_analysis
            || flags.update_ancillary_datasets;
        if refresh && path.is_file() {
            std::fs::remove_file(&path).map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })?;
        }
        if path.is_file() {
            info!(area = %area.name, path = %path.display(), "destination previously created, skipped");
            return Ok((path, false));
        }
        let opts = ExportOptions {
            delimiter: self.config.destination.delimiter,
            precision: self.config.destination.precision,
            ..ExportOptions::default()
        };
        write_frame_csv(analysis, &path, &opts)?;
        info!(area = %area.name, path = %path.display(), "destination written");
        Ok((path, true))
    }

    fn finish_area(
        &self,
        area: &AreaConfig,
        datasets: &AreaDatasets,
        pivot: NaiveDateTime,
    ) -> Result<AreaReport, ScenarioError> {
        let analysis = self.analyze_area(area, datasets, pivot)?;
        let indicators = self.indicators(&analysis)?;
        let (destination, exported) = self.dump_area(area, &analysis, pivot)?;
        enter(&area.name, AreaStage::Done);
        Ok(AreaReport {
            area: area.name.clone(),
            rows: analysis.height(),
            destination,
            exported,
            indicators,
        })
    }
}

/// Merge options for a source: its prefix and configured key columns.
fn merge_options(source: &SourceConfig) -> MergeOptions {
    MergeOptions {
        key_cols: source.merge_keys.clone(),
        prefix: source.spec.prefix.clone(),
        delimiter: source.spec.prefix_delimiter.clone(),
        time_col: TIME_COL.into(),
        ..MergeOptions::default()
    }
}

/// Data column names a source carries after reading and merging.
fn merged_data_columns(source: &SourceConfig) -> Result<Vec<String>, ScenarioError> {
    let columns = source.spec.data_columns(TIME_COL)?;
    Ok(match &source.spec.prefix {
        Some(p) => {
            let head = format!("{p}{}", source.spec.prefix_delimiter);
            columns
                .into_iter()
                .map(|c| if c.starts_with(&head) { c } else { format!("{head}{c}") })
                .collect()
        }
        None => columns,
    })
}

/// Drop rain and soil-moisture rows whose time is missing from the other series.
fn keep_common_times(
    rain: &mut Option<DataFrame>,
    sm: &mut Option<DataFrame>,
) -> Result<(), TableError> {
    let stamps = |f: &Option<DataFrame>| -> Result<HashSet<NaiveDateTime>, TableError> {
        match f {
            Some(f) => Ok(times(f, TIME_COL)?.into_iter().collect()),
            None => Ok(HashSet::new()),
        }
    };
    let rain_times = stamps(rain)?;
    let sm_times = stamps(sm)?;
    let common: HashSet<NaiveDateTime> = rain_times.intersection(&sm_times).copied().collect();
    for frame in [rain, sm].into_iter().flatten() {
        let keep: Vec<bool> = time_values(frame, TIME_COL)?
            .into_iter()
            .map(|t| t.map_or(false, |t| common.contains(&t)))
            .collect();
        let before = frame.height();
        *frame = filter_rows(frame, &keep)?;
        if frame.height() != before {
            debug!(dropped = before - frame.height(), "rows outside the common rain/soil-moisture times");
        }
    }
    Ok(())
}

/// Run the whole pipeline for `time_run`.
pub fn run_scenario(
    config: &ScenarioConfig,
    time_run: NaiveDateTime,
) -> Result<ScenarioReport, ScenarioError> {
    let scenario = Scenario::new(config, time_run)?;
    info!(
        time_run = %scenario.setup.time_run,
        steps = scenario.setup.time_range.len(),
        areas = config.areas.len(),
        "scenario started"
    );

    let organized: Vec<AreaDatasets> = if config.parallel {
        config
            .areas
            .par_iter()
            .map(|area| scenario.organize_area(area))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        config
            .areas
            .iter()
            .map(|area| scenario.organize_area(area))
            .collect::<Result<Vec<_>, _>>()?
    };

    let pivots: BTreeMap<String, Option<NaiveDateTime>> = organized
        .iter()
        .map(|d| (d.area.clone(), d.pivot))
        .collect();
    let pivot = reconcile_pivot(&pivots)?;
    info!(time_run = %scenario.setup.time_run, %pivot, "time pivot selected");

    let areas: Vec<AreaReport> = if config.parallel {
        config
            .areas
            .par_iter()
            .zip(organized.par_iter())
            .map(|(area, datasets)| scenario.finish_area(area, datasets, pivot))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        config
            .areas
            .iter()
            .zip(&organized)
            .map(|(area, datasets)| scenario.finish_area(area, datasets, pivot))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(ScenarioReport {
        time_run: scenario.setup.time_run,
        pivot,
        areas,
    })
}

/// Remove every artifact of `time_run`: datasets, and the analysis and
/// destination files of the pivot the datasets recorded. Returns the number
/// of files removed.
pub fn clean_scenario(
    config: &ScenarioConfig,
    time_run: NaiveDateTime,
) -> Result<usize, ScenarioError> {
    let scenario = Scenario::new(config, time_run)?;
    let mut removed = 0;
    for area in &config.areas {
        let rel = scenario.datasets_path(&area.name);
        let pivot = match scenario.store.read::<DatasetsManifest>(&rel) {
            Ok(manifest) => manifest.and_then(|m| m.pivot),
            Err(e) => {
                warn!(area = %area.name, error = %e, "datasets unreadable, removing anyway");
                None
            }
        };
        if scenario.remove_datasets(&area.name)? {
            removed += 1;
        }
        if let Some(pivot) = pivot {
            if scenario.store.remove(&scenario.analysis_path(&area.name, pivot))? {
                removed += 1;
            }
            let dst = scenario.destination_path(&area.name, pivot);
            if dst.is_file() {
                std::fs::remove_file(&dst).map_err(|source| ExportError::Io {
                    path: dst.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        info!(area = %area.name, "artifacts cleaned");
    }
    Ok(removed)
}
