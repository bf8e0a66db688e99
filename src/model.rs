use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};

use crate::{
    error::{Error, Result},
    types::{Field, FeatureRow, PredictionResult, Selection},
};

/// Fitted mapping from a categorical row to the predictor's input vector.
pub trait FeatureTransformer: Send + Sync {
    fn n_features_out(&self) -> usize;
    fn transform(&self, row: &FeatureRow<'_>) -> Result<Vec<f32>>;
}

/// Fitted regression from a feature vector to a duration in seconds.
pub trait Predictor: Send + Sync {
    /// Expected input width, when the artifact records one.
    fn n_features_in(&self) -> Option<usize>;
    fn predict(&self, x: &[f32]) -> Result<f64>;
}

// ---------- Transformer ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleUnknown {
    #[default]
    Error,
    Ignore,
}

#[derive(Deserialize)]
struct EncoderJson {
    columns: Vec<String>,
    categories: Vec<Vec<String>>,
    #[serde(default)]
    handle_unknown: HandleUnknown,
}

/// One-hot encoder exported by the training job. Output is the
/// concatenation of one block per column, in the encoder's column order.
#[derive(Debug, Clone)]
pub struct OneHotEncoder {
    fields: Vec<Field>,
    categories: Vec<Vec<String>>,
    handle_unknown: HandleUnknown,
    width: usize,
}

impl OneHotEncoder {
    pub fn new(
        columns: &[&str],
        categories: Vec<Vec<String>>,
        handle_unknown: HandleUnknown,
    ) -> Result<Self> {
        if columns.len() != Field::ALL.len() || categories.len() != columns.len() {
            return Err(Error::unavailable(
                "feature transformer",
                format!(
                    "expected {} columns with categories, got {} columns and {} category lists",
                    Field::ALL.len(),
                    columns.len(),
                    categories.len()
                ),
            ));
        }
        let mut fields = Vec::with_capacity(columns.len());
        for name in columns {
            let field = Field::ALL
                .into_iter()
                .find(|f| f.column() == *name)
                .ok_or_else(|| Error::unavailable("feature transformer", format!("unknown column `{name}`")))?;
            if fields.contains(&field) {
                return Err(Error::unavailable("feature transformer", format!("duplicate column `{name}`")));
            }
            fields.push(field);
        }
        let width = categories.iter().map(Vec::len).sum();
        Ok(Self { fields, categories, handle_unknown, width })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path).map_err(|e| {
            Error::unavailable("feature transformer", format!("failed to read {}: {e}", path.display()))
        })?;
        let enc: EncoderJson = serde_json::from_str(&txt).map_err(|e| {
            Error::unavailable("feature transformer", format!("failed to parse {}: {e}", path.display()))
        })?;
        let columns: Vec<&str> = enc.columns.iter().map(String::as_str).collect();
        Self::new(&columns, enc.categories, enc.handle_unknown)
    }
}

impl FeatureTransformer for OneHotEncoder {
    fn n_features_out(&self) -> usize {
        self.width
    }

    fn transform(&self, row: &FeatureRow<'_>) -> Result<Vec<f32>> {
        let values = row.values();
        let mut out = vec![0.0; self.width];
        let mut offset = 0;
        for (field, cats) in self.fields.iter().zip(&self.categories) {
            let value = values[field.index()];
            match category_slot(*field, cats, value) {
                Some(i) => out[offset + i] = 1.0,
                None if self.handle_unknown == HandleUnknown::Ignore => {}
                None => {
                    return Err(Error::Transform(format!(
                        "Found unknown category '{value}' in column '{}' during transform",
                        field.column()
                    )))
                }
            }
            offset += cats.len();
        }
        Ok(out)
    }
}

/// Exact match first. Locality labels are normalised when the catalog is
/// read, so the fitted spelling (`URBAN`, `urban`) is matched ignoring case.
fn category_slot(field: Field, cats: &[String], value: &str) -> Option<usize> {
    cats.iter().position(|c| c == value).or_else(|| match field {
        Field::LocalityClass => cats.iter().position(|c| c.trim().eq_ignore_ascii_case(value)),
        _ => None,
    })
}

// ---------- Predictors ----------

#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl Predictor for LinearModel {
    fn n_features_in(&self) -> Option<usize> {
        Some(self.coefficients.len())
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        check_len(x, self.coefficients.len())?;
        Ok(self.intercept + self.coefficients.iter().zip(x).map(|(w, v)| w * *v as f64).sum::<f64>())
    }
}

/// Flattened regression tree. A leaf has `children_left[i] == -1`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegressionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl RegressionTree {
    fn validate(&self) -> std::result::Result<(), String> {
        let n = self.children_left.len();
        if n == 0 {
            return Err("empty tree".into());
        }
        if [self.children_right.len(), self.feature.len(), self.threshold.len(), self.value.len()]
            .iter()
            .any(|len| *len != n)
        {
            return Err("node arrays differ in length".into());
        }
        for i in 0..n {
            let (l, r) = (self.children_left[i], self.children_right[i]);
            if l == -1 {
                continue;
            }
            if l < 0 || r < 0 || l as usize >= n || r as usize >= n || self.feature[i] < 0 {
                return Err(format!("node {i} has invalid children or feature"));
            }
        }
        Ok(())
    }

    fn max_feature(&self) -> Option<usize> {
        self.feature
            .iter()
            .zip(&self.children_left)
            .filter(|(_, l)| **l != -1)
            .map(|(f, _)| *f as usize)
            .max()
    }

    fn eval(&self, x: &[f32]) -> Result<f64> {
        let mut node = 0usize;
        // a well-formed tree reaches a leaf in at most n steps
        for _ in 0..self.children_left.len() {
            if self.children_left[node] == -1 {
                return Ok(self.value[node]);
            }
            let f = self.feature[node] as usize;
            let v = *x
                .get(f)
                .ok_or_else(|| Error::Model(format!("tree split on feature {f} beyond input width {}", x.len())))?;
            node = if (v as f64) <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        Err(Error::Model("tree traversal did not reach a leaf".into()))
    }
}

/// Averaging ensemble of regression trees.
#[derive(Debug, Clone, Deserialize)]
pub struct Forest {
    pub trees: Vec<RegressionTree>,
    #[serde(default)]
    pub n_features_in: Option<usize>,
}

impl Predictor for Forest {
    fn n_features_in(&self) -> Option<usize> {
        self.n_features_in
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        if let Some(n) = self.n_features_in {
            check_len(x, n)?;
        }
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.eval(x)?;
        }
        Ok(sum / self.trees.len() as f64)
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PredictorJson {
    Linear(LinearModel),
    Forest(Forest),
}

fn check_len(x: &[f32], expected: usize) -> Result<()> {
    if x.len() != expected {
        return Err(Error::Model(format!(
            "feature length mismatch: got {}, expected {}",
            x.len(),
            expected
        )));
    }
    Ok(())
}

/// Loads a predictor artifact. JSON artifacts carry a `kind` tag; with the
/// `torch` feature a `.pt` file is loaded as a TorchScript module.
pub fn load_predictor(path: impl AsRef<Path>) -> Result<Arc<dyn Predictor>> {
    let path = path.as_ref();
    if let Some(p) = load_torchscript(path)? {
        return Ok(p);
    }

    let txt = fs::read_to_string(path)
        .map_err(|e| Error::unavailable("predictor", format!("failed to read {}: {e}", path.display())))?;
    let parsed: PredictorJson = serde_json::from_str(&txt)
        .map_err(|e| Error::unavailable("predictor", format!("failed to parse {}: {e}", path.display())))?;
    let predictor: Arc<dyn Predictor> = match parsed {
        PredictorJson::Linear(m) => Arc::new(m),
        PredictorJson::Forest(f) => {
            if f.trees.is_empty() {
                return Err(Error::unavailable("predictor", "forest has no trees"));
            }
            for (i, tree) in f.trees.iter().enumerate() {
                tree.validate()
                    .map_err(|e| Error::unavailable("predictor", format!("tree {i}: {e}")))?;
                if let (Some(n), Some(max)) = (f.n_features_in, tree.max_feature()) {
                    if max >= n {
                        return Err(Error::unavailable(
                            "predictor",
                            format!("tree {i} splits on feature {max}, input width is {n}"),
                        ));
                    }
                }
            }
            Arc::new(f)
        }
    };
    Ok(predictor)
}

#[cfg(feature = "torch")]
fn load_torchscript(path: &Path) -> Result<Option<Arc<dyn Predictor>>> {
    if path.extension().is_some_and(|e| e == "pt") {
        let predictor: Arc<dyn Predictor> = Arc::new(torch::TorchPredictor::load(path)?);
        return Ok(Some(predictor));
    }
    Ok(None)
}

#[cfg(not(feature = "torch"))]
fn load_torchscript(_path: &Path) -> Result<Option<Arc<dyn Predictor>>> {
    Ok(None)
}

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use tch::{kind::Kind, CModule, Device, Tensor};

    use super::Predictor;
    use crate::error::{Error, Result};

    /// TorchScript regressor taking `[1, in_dim]` and returning one value.
    pub struct TorchPredictor {
        model: CModule,
        device: Device,
    }

    impl TorchPredictor {
        pub fn load(path: &Path) -> Result<Self> {
            let device = Device::Cpu;
            let model = CModule::load_on_device(path, device).map_err(|e| {
                Error::unavailable("predictor", format!("failed to load TorchScript {}: {e}", path.display()))
            })?;
            Ok(Self { model, device })
        }
    }

    impl Predictor for TorchPredictor {
        fn n_features_in(&self) -> Option<usize> {
            None
        }

        fn predict(&self, x: &[f32]) -> Result<f64> {
            let input = Tensor::from_slice(x).reshape([1, x.len() as i64]).to_device(self.device);
            let t = self
                .model
                .forward_ts(&[input])
                .map_err(|e| Error::Model(e.to_string()))?
                .to_kind(Kind::Double);
            if t.numel() != 1 {
                return Err(Error::Model(format!("unexpected model output size: {:?}", t.size())));
            }
            Ok(t.reshape([1]).double_value(&[0]))
        }
    }
}

// ---------- Service ----------

/// Feature transform followed by a single predict call.
#[derive(Clone)]
pub struct PredictionService {
    transformer: Arc<dyn FeatureTransformer>,
    predictor: Arc<dyn Predictor>,
}

impl PredictionService {
    /// Pairs the two artifacts and runs a warm-up forward pass on a zero vector.
    pub fn new(transformer: Arc<dyn FeatureTransformer>, predictor: Arc<dyn Predictor>) -> Result<Self> {
        let width = transformer.n_features_out();
        if let Some(n) = predictor.n_features_in() {
            if n != width {
                return Err(Error::unavailable(
                    "model",
                    format!("transformer emits {width} features, predictor expects {n}"),
                ));
            }
        }
        predictor
            .predict(&vec![0.0; width])
            .map_err(|e| Error::unavailable("model", format!("warmup forward failed: {e}")))?;
        tracing::info!("warmup forward ok (in_dim={width})");
        Ok(Self { transformer, predictor })
    }

    pub fn load(transformer_path: impl AsRef<Path>, predictor_path: impl AsRef<Path>) -> Result<Self> {
        let transformer = Arc::new(OneHotEncoder::load(transformer_path)?);
        let predictor = load_predictor(predictor_path)?;
        Self::new(transformer, predictor)
    }

    pub fn n_features(&self) -> usize {
        self.transformer.n_features_out()
    }

    /// Rejects incomplete selections before touching the transformer.
    pub fn predict(&self, selection: &Selection) -> Result<PredictionResult> {
        let row = selection.feature_row()?;
        let x = self.transformer.transform(&row)?;

        if std::env::var("LOG_PRED").ok().as_deref() == Some("1") {
            let nz = x.iter().filter(|v| **v != 0.0).count();
            tracing::info!(
                "predict town={} substation={} feeder={} class={} in_dim={} nonzero={}",
                row.town, row.substation, row.feeder, row.locality_class, x.len(), nz
            );
        }

        let raw = self.predictor.predict(&x)?;
        if !raw.is_finite() {
            return Err(Error::Model(format!("non-finite prediction {raw}")));
        }
        Ok(PredictionResult::from_raw_seconds(raw))
    }
}
