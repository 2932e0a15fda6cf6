use pretraining_data::chunker::DEFAULT_BATCH_SIZE;
use pretraining_data::dataset::DEFAULT_BLOCKS_PER_SHARD;
use pretraining_data::{ChunkerConfig, CorpusFiles, DataError, DatasetLayout};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::environment::RuntimeEnvironment;
use crate::job::SubmitError;
use crate::planner::{self, BatchPlan, ClusterShape, MicrobatchPolicy, PlanError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub data: DataConfig,
    pub tokenizer: TokenizerConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    pub job: JobConfig,
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LaunchConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: LaunchConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if self.data.corpus.is_empty() {
            errors.push("data.corpus must not be empty".to_string());
        }

        if self.data.text_field.trim().is_empty() {
            errors.push("data.text_field must not be empty".to_string());
        }

        if self.data.block_size == 0 {
            errors.push("data.block_size must be greater than 0".to_string());
        }

        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be greater than 0".to_string());
        }

        if self.data.blocks_per_shard == 0 {
            errors.push("data.blocks_per_shard must be greater than 0".to_string());
        }

        if self.tokenizer.tokenizer_json.is_none()
            && self.tokenizer.vocab.is_none()
            && self.tokenizer.merges.is_none()
            && self.tokenizer.dir.is_none()
        {
            errors.push(
                "tokenizer must provide `dir`, `tokenizer_json`, or `vocab` and `merges`"
                    .to_string(),
            );
        }

        if self.tokenizer.tokenizer_json.is_none()
            && self.tokenizer.vocab.is_some() != self.tokenizer.merges.is_some()
        {
            errors.push("tokenizer.vocab and tokenizer.merges must be given together".to_string());
        }

        if let Some(0) = self.tokenizer.max_length {
            errors.push("tokenizer.max_length must be greater than 0".to_string());
        }

        for (field, value) in [
            ("processes_per_node", self.cluster.processes_per_node),
            ("world_size", self.cluster.world_size),
            ("tensor_parallel_degree", self.cluster.tensor_parallel_degree),
            ("pipeline_parallel_degree", self.cluster.pipeline_parallel_degree),
            ("global_batch_size", self.cluster.global_batch_size),
        ] {
            if value == 0 {
                errors.push(format!("cluster.{} must be greater than 0", field));
            }
        }

        if let Some(0) = self.cluster.micro_batch_size {
            errors.push("cluster.micro_batch_size must be greater than 0".to_string());
        }

        let hp = &self.hyperparameters;
        if hp.learning_rate <= 0.0 {
            errors.push("hyperparameters.learning_rate must be greater than 0".to_string());
        }

        if hp.min_learning_rate < 0.0 {
            errors.push("hyperparameters.min_learning_rate must be >= 0".to_string());
        }

        if hp.min_learning_rate > hp.learning_rate {
            errors.push(
                "hyperparameters.min_learning_rate cannot exceed hyperparameters.learning_rate"
                    .to_string(),
            );
        }

        if hp.weight_decay < 0.0 {
            errors.push("hyperparameters.weight_decay must be >= 0".to_string());
        }

        if hp.max_steps == 0 {
            errors.push("hyperparameters.max_steps must be greater than 0".to_string());
        }

        if hp.warmup_steps.saturating_add(hp.constant_steps) > hp.max_steps {
            errors.push(
                "hyperparameters.warmup_steps + constant_steps cannot exceed max_steps".to_string(),
            );
        }

        if let Some(0) = hp.seq_length {
            errors.push("hyperparameters.seq_length must be greater than 0".to_string());
        }

        if let Some(seq_length) = hp.seq_length {
            if seq_length != self.data.block_size {
                errors.push(format!(
                    "hyperparameters.seq_length ({}) must match data.block_size ({})",
                    seq_length, self.data.block_size
                ));
            }
        }

        if !is_valid_job_name(&self.job.name) {
            errors.push(
                "job.name must be 1-63 characters of letters, digits and '-', starting with a letter or digit"
                    .to_string(),
            );
        }

        if self.job.image.trim().is_empty() {
            errors.push("job.image must not be empty".to_string());
        }

        if self.job.instance_type.trim().is_empty() {
            errors.push("job.instance_type must not be empty".to_string());
        }

        if let Some(count) = self.job.instance_count {
            if count != self.cluster.world_size {
                errors.push(format!(
                    "job.instance_count ({}) must equal cluster.world_size ({})",
                    count, self.cluster.world_size
                ));
            }
        }

        if self.job.checkpoint_location.trim().is_empty() {
            errors.push("job.checkpoint_location must not be empty".to_string());
        }

        if self.job.dataset_destination.trim().is_empty() {
            errors.push("job.dataset_destination must not be empty".to_string());
        }

        if self.job.max_run_seconds == 0 {
            errors.push("job.max_run_seconds must be greater than 0".to_string());
        }

        self.environment.validate(&mut errors);

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.data.apply_base_path(base);
        self.tokenizer.apply_base_path(base);
        self.storage.apply_base_path(base);
    }

    pub fn plan(&self) -> Result<BatchPlan, PlanError> {
        planner::plan(
            &self.cluster.shape(),
            self.cluster.global_batch_size,
            self.cluster.microbatch_policy(),
        )
    }

    /// Sequence length the job trains at; the dataset block size unless set.
    pub fn seq_length(&self) -> usize {
        self.hyperparameters
            .seq_length
            .unwrap_or(self.data.block_size)
    }

    pub fn instance_count(&self) -> usize {
        self.job.instance_count.unwrap_or(self.cluster.world_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub corpus: Vec<PathBuf>,
    #[serde(default = "default_text_field")]
    pub text_field: String,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_blocks_per_shard")]
    pub blocks_per_shard: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub attention_mask: bool,
}

impl DataConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for file in &mut self.corpus {
            absolutize_in_place(file, base);
        }
        absolutize_in_place(&mut self.output_dir, base);
    }

    pub fn corpus_files(&self) -> Result<CorpusFiles, DataError> {
        CorpusFiles::new(self.corpus.clone(), self.text_field.clone())
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            text_field: self.text_field.clone(),
            block_size: self.block_size,
            batch_size: self.batch_size,
        }
    }

    pub fn layout(&self) -> DatasetLayout {
        let mut layout = DatasetLayout::new(&self.output_dir);
        layout.blocks_per_shard = self.blocks_per_shard;
        layout.include_attention_mask = self.attention_mask;
        layout
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Directory holding the artifacts; `tokenizer.json` is used from it
    /// when no explicit file is named.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub tokenizer_json: Option<PathBuf>,
    #[serde(default)]
    pub vocab: Option<PathBuf>,
    #[serde(default)]
    pub merges: Option<PathBuf>,
    #[serde(default)]
    pub tokenizer_config: Option<PathBuf>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default = "default_add_special_tokens")]
    pub add_special_tokens: bool,
}

impl TokenizerConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for path in [
            self.dir.as_mut(),
            self.tokenizer_json.as_mut(),
            self.vocab.as_mut(),
            self.merges.as_mut(),
            self.tokenizer_config.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            absolutize_in_place(path, base);
        }
    }

    /// Without `dir`, the artifact directory is the one holding the first
    /// named file; `tokenizer_config.json` is looked up there too.
    pub fn to_tokenizer_config(&self) -> tokenizer::Config {
        let dir = self
            .dir
            .clone()
            .or_else(|| {
                [&self.tokenizer_json, &self.vocab]
                    .into_iter()
                    .flatten()
                    .find_map(|path| path.parent().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = tokenizer::Config::from_dir(dir);

        if self.tokenizer_json.is_some() {
            config.artifacts.tokenizer_json = self.tokenizer_json.clone();
        } else if self.vocab.is_some() || self.merges.is_some() {
            config.artifacts.tokenizer_json = None;
            config.artifacts.vocab_json = self.vocab.clone();
            config.artifacts.merges_txt = self.merges.clone();
        }
        config.artifacts.tokenizer_config_json = self.tokenizer_config.clone();
        config.max_length = self.max_length;
        config.add_special_tokens = self.add_special_tokens;
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub processes_per_node: usize,
    pub world_size: usize,
    pub tensor_parallel_degree: usize,
    pub pipeline_parallel_degree: usize,
    pub global_batch_size: usize,
    /// Samples per microbatch; one when unset.
    #[serde(default)]
    pub micro_batch_size: Option<usize>,
}

impl ClusterConfig {
    pub fn shape(&self) -> ClusterShape {
        ClusterShape {
            processes_per_node: self.processes_per_node,
            world_size: self.world_size,
            tensor_parallel_degree: self.tensor_parallel_degree,
            pipeline_parallel_degree: self.pipeline_parallel_degree,
        }
    }

    pub fn microbatch_policy(&self) -> MicrobatchPolicy {
        MicrobatchPolicy::from_micro_batch_size(self.micro_batch_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_min_learning_rate")]
    pub min_learning_rate: f32,
    #[serde(default = "default_warmup_steps")]
    pub warmup_steps: usize,
    #[serde(default)]
    pub constant_steps: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    #[serde(default)]
    pub seq_length: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub precision: Precision,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            min_learning_rate: default_min_learning_rate(),
            warmup_steps: default_warmup_steps(),
            constant_steps: 0,
            max_steps: default_max_steps(),
            weight_decay: default_weight_decay(),
            seq_length: None,
            seed: default_seed(),
            precision: Precision::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
    #[default]
    Bf16,
    Mixed,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Bf16 => "bf16",
            Precision::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub image: String,
    pub instance_type: String,
    /// Defaults to `cluster.world_size`.
    #[serde(default)]
    pub instance_count: Option<usize>,
    pub checkpoint_location: String,
    pub dataset_destination: String,
    #[serde(default = "default_max_run_seconds")]
    pub max_run_seconds: u64,
    /// Keeps the provisioned instances warm after the job ends.
    #[serde(default)]
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            spool_dir: default_spool_dir(),
        }
    }
}

impl StorageConfig {
    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.root, base);
        absolutize_in_place(&mut self.spool_dir, base);
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn is_valid_job_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = matches!(chars.next(), Some(first) if first.is_ascii_alphanumeric());
    starts_well && name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn default_text_field() -> String {
    "text".to_string()
}

fn default_block_size() -> usize {
    4_096
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_blocks_per_shard() -> usize {
    DEFAULT_BLOCKS_PER_SHARD
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_add_special_tokens() -> bool {
    true
}

fn default_learning_rate() -> f32 {
    3e-4
}

fn default_min_learning_rate() -> f32 {
    3e-5
}

fn default_warmup_steps() -> usize {
    2_000
}

fn default_max_steps() -> usize {
    100_000
}

fn default_weight_decay() -> f32 {
    0.1
}

fn default_seed() -> u64 {
    1_234
}

fn default_max_run_seconds() -> u64 {
    5 * 24 * 60 * 60
}

fn default_store_root() -> PathBuf {
    PathBuf::from("store")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Plan(PlanError),
    Data(DataError),
    Submit(SubmitError),
}

impl TrainingError {
    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "failed to read config: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Plan(err) => write!(f, "batch planning failed: {}", err),
            TrainingError::Data(err) => write!(f, "dataset preparation failed: {}", err),
            TrainingError::Submit(err) => write!(f, "job submission failed: {}", err),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            TrainingError::Plan(err) => Some(err),
            TrainingError::Data(err) => Some(err),
            TrainingError::Submit(err) => Some(err),
            TrainingError::ConfigFormat(_) | TrainingError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<PlanError> for TrainingError {
    fn from(value: PlanError) -> Self {
        TrainingError::Plan(value)
    }
}

impl From<DataError> for TrainingError {
    fn from(value: DataError) -> Self {
        TrainingError::Data(value)
    }
}

impl From<tokenizer::Error> for TrainingError {
    fn from(value: tokenizer::Error) -> Self {
        TrainingError::Data(DataError::Tokenizer(value))
    }
}

impl From<pretraining_data::StorageError> for TrainingError {
    fn from(value: pretraining_data::StorageError) -> Self {
        TrainingError::Data(DataError::Storage(value))
    }
}

impl From<SubmitError> for TrainingError {
    fn from(value: SubmitError) -> Self {
        TrainingError::Submit(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[data]
corpus = ["corpus/wiki.jsonl"]
block_size = 2048

[tokenizer]
dir = "tokenizer"

[cluster]
processes_per_node = 32
world_size = 8
tensor_parallel_degree = 8
pipeline_parallel_degree = 8
global_batch_size = 512

[job]
name = "llama-pretrain"
image = "registry.example.com/neuronx:2.1"
instance_type = "trn1.32xlarge"
checkpoint_location = "s3://bucket/checkpoints"
dataset_destination = "s3://bucket/datasets/wiki"
"#;

    fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_toml_with_defaults_and_resolves_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "launch.toml", MINIMAL);

        let config = LaunchConfig::from_path(&path).unwrap();
        assert_eq!(config.data.corpus, vec![tmp.path().join("corpus/wiki.jsonl")]);
        assert_eq!(config.data.output_dir, tmp.path().join("dataset"));
        assert_eq!(config.data.text_field, "text");
        assert_eq!(config.tokenizer.dir, Some(tmp.path().join("tokenizer")));
        assert_eq!(config.storage.spool_dir, tmp.path().join("spool"));
        assert_eq!(config.seq_length(), 2048);
        assert_eq!(config.instance_count(), 8);
        assert_eq!(config.hyperparameters.precision, Precision::Bf16);
        assert_eq!(config.environment, RuntimeEnvironment::default());
    }

    #[test]
    fn loads_json() {
        let tmp = tempfile::tempdir().unwrap();
        let value: toml::Value = toml::from_str(MINIMAL).unwrap();
        let path = write_config(
            tmp.path(),
            "launch.json",
            &serde_json::to_string(&value).unwrap(),
        );

        let config = LaunchConfig::from_path(&path).unwrap();
        assert_eq!(config.cluster.global_batch_size, 512);
        assert_eq!(config.plan().unwrap().num_microbatches, 128);
    }

    #[test]
    fn rejects_unknown_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "launch.yaml", MINIMAL);
        assert!(matches!(
            LaunchConfig::from_path(&path),
            Err(TrainingError::ConfigFormat(_))
        ));
    }

    #[test]
    fn validation_reports_every_problem() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = MINIMAL
            .replace("block_size = 2048", "block_size = 0")
            .replace("world_size = 8", "world_size = 0")
            .replace("name = \"llama-pretrain\"", "name = \"bad name!\"")
            .replace("image = \"registry.example.com/neuronx:2.1\"", "image = \"\"");
        let path = write_config(tmp.path(), "launch.toml", &broken);

        match LaunchConfig::from_path(&path) {
            Err(TrainingError::Validation(messages)) => {
                assert_eq!(messages.len(), 4, "{messages:?}");
                assert!(messages.iter().any(|m| m.contains("data.block_size")));
                assert!(messages.iter().any(|m| m.contains("cluster.world_size")));
                assert!(messages.iter().any(|m| m.contains("job.name")));
                assert!(messages.iter().any(|m| m.contains("job.image")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn topology_is_not_a_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MINIMAL.replace("tensor_parallel_degree = 8", "tensor_parallel_degree = 6");
        let path = write_config(tmp.path(), "launch.toml", &config);

        let config = LaunchConfig::from_path(&path).unwrap();
        assert!(matches!(config.plan(), Err(PlanError::Topology { .. })));
    }

    #[test]
    fn tokenizer_config_prefers_explicit_files() {
        let tokenizer = TokenizerConfig {
            dir: None,
            tokenizer_json: None,
            vocab: Some(PathBuf::from("/artifacts/vocab.json")),
            merges: Some(PathBuf::from("/artifacts/merges.txt")),
            tokenizer_config: None,
            max_length: Some(2048),
            add_special_tokens: false,
        };
        let config = tokenizer.to_tokenizer_config();
        assert!(config.artifacts.tokenizer_json.is_none());
        assert!(config.expects_split_files());
        assert_eq!(config.max_length, Some(2048));
        assert!(!config.add_special_tokens);
    }
}
