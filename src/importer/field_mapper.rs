// ==========================================
// 医疗数据导入系统 - 字段映射引擎
// ==========================================
// 职责: 源列 → 实体字段映射 + 类型转换 + 行级错误隔离
// 流程: 逐行（文件顺序）构建实体 → 全部入队（map_all，无 I/O）
//       → 单次批量落库（MappedBatch::persist）→ 计数
// 策略: 部分写入。字段转换失败只记录 LineError，行继续映射并入队；
//       失败字段保持默认值。批量落库失败则整批每行记一条落库错误
// ==========================================

use crate::domain::import::{FieldMapping, ImportCounters, LineError, RowRecord};
use crate::domain::types::DataType;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::master_data_repo::EntityPersister;
use std::fmt;
use tracing::{debug, info, instrument, warn};

// ==========================================
// FieldKind / FieldValue
// ==========================================

/// 目标字段的类型（决定字符串如何转换）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Decimal,
    Bool,
    Text,
    Enum, // 文本透传，由 setter 按枚举标签校验
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::Int => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Bool => "boolean",
            FieldKind::Text => "text",
            FieldKind::Enum => "enum",
        };
        write!(f, "{}", label)
    }
}

/// 转换后的字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Decimal(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn into_i64(self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_i32(self) -> Result<Option<i32>, String> {
        match self {
            FieldValue::Int(v) => i32::try_from(v)
                .map(Some)
                .map_err(|_| format!("value {} out of range for 32-bit integer", v)),
            FieldValue::Null => Ok(None),
            other => Err(format!("expected integer, got {:?}", other)),
        }
    }

    pub fn into_f64(self) -> Option<f64> {
        match self {
            FieldValue::Decimal(v) => Some(v),
            FieldValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

// ==========================================
// 类型转换（与区域设置无关）
// ==========================================

/// 字符串 → FieldValue
///
/// 空白值返回 Null，由调用方按 nullable 决定是否报错
pub fn coerce(kind: FieldKind, raw: &str) -> Result<FieldValue, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(FieldValue::Null);
    }

    match kind {
        FieldKind::Int => parse_int(value).map(FieldValue::Int),
        FieldKind::Decimal => parse_decimal(value).map(FieldValue::Decimal),
        FieldKind::Bool => parse_bool(value).map(FieldValue::Bool),
        FieldKind::Text | FieldKind::Enum => Ok(FieldValue::Text(value.to_string())),
    }
}

fn parse_int(value: &str) -> Result<i64, String> {
    if let Ok(v) = value.parse::<i64>() {
        return Ok(v);
    }
    // 电子表格数值单元格会以 "12.0" 形式出现
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(format!("'{}' is not a valid integer", value)),
    }
}

fn parse_decimal(value: &str) -> Result<f64, String> {
    // 只接受 '.' 作为小数点
    if value.contains(',') {
        return Err(format!("'{}' is not a valid decimal (use '.' as separator)", value));
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f),
        _ => Err(format!("'{}' is not a valid decimal", value)),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "sim" | "s" => Ok(true),
        "false" | "0" | "no" | "n" | "nao" | "não" => Ok(false),
        _ => Err(format!("'{}' is not a valid boolean", value)),
    }
}

/// 字段名归一化: 忽略大小写与下划线（TotalBeds == total_beds）
pub fn normalize_field_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

// ==========================================
// FieldSpec / MappableEntity
// ==========================================

/// 实体字段元数据: (字段名, 类型, 是否可空, setter)
pub struct FieldSpec<E> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub apply: fn(&mut E, FieldValue) -> Result<(), String>,
}

/// 可由映射引擎构建的实体
pub trait MappableEntity: Default + Send + 'static {
    const KIND: DataType;

    /// 有序字段注册表
    fn field_specs() -> &'static [FieldSpec<Self>];

    fn find_field(target: &str) -> Option<&'static FieldSpec<Self>> {
        let wanted = normalize_field_name(target);
        Self::field_specs()
            .iter()
            .find(|spec| normalize_field_name(spec.name) == wanted)
    }
}

// ==========================================
// MappingOutcome
// ==========================================
#[derive(Debug, Default)]
pub struct MappingOutcome {
    pub processed: usize,
    pub imported: usize,
    pub duplicated: usize,
    pub failed: usize, // 至少一条 LineError 的行数
    pub errors: Vec<LineError>,
}

impl MappingOutcome {
    pub fn counters(&self) -> ImportCounters {
        ImportCounters {
            total: self.processed as i64,
            imported: self.imported as i64,
            duplicated: self.duplicated as i64,
            failed: self.failed as i64,
        }
    }
}

struct Binding<E: 'static> {
    source_column: String,
    spec: &'static FieldSpec<E>,
}

struct QueuedRow<E> {
    line: usize,
    entity: E,
    had_error: bool,
}

// ==========================================
// MappedBatch - 已映射、待落库的批次
// ==========================================
pub struct MappedBatch<E> {
    job_id: String,
    processed: usize,
    record_failures: usize,
    queue: Vec<QueuedRow<E>>,
    errors: Vec<LineError>,
}

impl<E> MappedBatch<E> {
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 单次批量落库并汇总计数
    ///
    /// 落库失败时每个入队行记一条 LineError，整批计为失败
    #[instrument(skip(self, persister), fields(job_id = %self.job_id, rows = self.queue.len()))]
    pub fn persist<P>(self, persister: &P) -> MappingOutcome
    where
        P: EntityPersister<E> + ?Sized,
    {
        let MappedBatch {
            job_id,
            processed,
            record_failures,
            queue,
            errors,
        } = self;
        let mut outcome = MappingOutcome {
            processed,
            errors,
            ..Default::default()
        };

        let field_failures = queue.iter().filter(|q| q.had_error).count();
        if field_failures > 0 {
            warn!(rows = field_failures, "部分行存在字段转换错误（已按部分写入入队）");
        }

        if queue.is_empty() {
            outcome.failed = record_failures;
            info!(processed = outcome.processed, failed = outcome.failed, "无可落库实体");
            return outcome;
        }

        let (lines, entities): (Vec<usize>, Vec<E>) =
            queue.into_iter().map(|q| (q.line, q.entity)).unzip();

        match persister.persist_batch(&job_id, &entities) {
            Ok(persisted) => {
                outcome.imported = persisted.inserted;
                outcome.duplicated = persisted.duplicated;
                outcome.failed = record_failures + field_failures;
            }
            Err(e) => {
                let failure = ImportError::BatchPersistence {
                    rows: entities.len(),
                    message: e.to_string(),
                };
                warn!(error = %failure, "批量落库失败，整批记为失败");
                for line in &lines {
                    outcome.errors.push(failure.to_line_error(&job_id, *line, None));
                }
                outcome.failed = record_failures + lines.len();
            }
        }

        info!(
            processed = outcome.processed,
            imported = outcome.imported,
            duplicated = outcome.duplicated,
            failed = outcome.failed,
            "字段映射完成"
        );
        outcome
    }
}

// ==========================================
// FieldMappingEngine
// ==========================================
pub struct FieldMappingEngine<E: MappableEntity> {
    job_id: String,
    bindings: Vec<Binding<E>>,
    mapping_errors: Vec<LineError>,
}

impl<E: MappableEntity> FieldMappingEngine<E> {
    /// 解析映射表；未知目标字段记一条 line 0 错误并在所有行中跳过
    pub fn new(job_id: &str, mappings: &[FieldMapping]) -> Self {
        let mut bindings = Vec::with_capacity(mappings.len());
        let mut mapping_errors = Vec::new();

        for mapping in mappings {
            match E::find_field(&mapping.target_field) {
                Some(spec) => bindings.push(Binding {
                    source_column: mapping.source_column.clone(),
                    spec,
                }),
                None => {
                    warn!(
                        job_id = %job_id,
                        entity = %E::KIND,
                        target_field = %mapping.target_field,
                        "未知目标字段，映射已跳过"
                    );
                    mapping_errors.push(LineError::new(
                        job_id,
                        0,
                        mapping.target_field.clone(),
                        format!("unknown target field '{}' for {}", mapping.target_field, E::KIND),
                        Some(mapping.source_column.clone()),
                    ));
                }
            }
        }

        Self {
            job_id: job_id.to_string(),
            bindings,
            mapping_errors,
        }
    }

    fn convert(spec: &FieldSpec<E>, entity: &mut E, line: usize, raw: &str) -> ImportResult<()> {
        coerce(spec.kind, raw)
            .and_then(|value| {
                if value == FieldValue::Null && !spec.nullable {
                    return Err("required value is empty".to_string());
                }
                (spec.apply)(entity, value)
            })
            .map_err(|message| ImportError::FieldConversion {
                line,
                field: spec.name.to_string(),
                message: format!("cannot convert to {}: {}", spec.kind, message),
            })
    }

    /// 单行映射: 返回实体（可能部分填充）与该行的字段错误
    pub fn map_row(&self, row: &RowRecord) -> (E, Vec<LineError>) {
        let mut entity = E::default();
        let mut errors = Vec::new();

        for binding in &self.bindings {
            // 行内缺列: 静默跳过
            let Some(raw) = row.get(&binding.source_column) else {
                continue;
            };

            if let Err(e) = Self::convert(binding.spec, &mut entity, row.line, raw) {
                debug!(job_id = %self.job_id, raw = %raw, error = %e, "字段转换失败");
                errors.push(e.to_line_error(&self.job_id, row.line, Some(raw.to_string())));
            }
        }

        (entity, errors)
    }

    /// 映射全部记录（文件顺序，单线程，不落库）
    ///
    /// # 参数
    /// - rows: 读取器产出的惰性记录序列；Err 为单条记录的解析失败
    #[instrument(skip(self, rows), fields(job_id = %self.job_id, entity = %E::KIND))]
    pub fn map_all<I>(&self, rows: I) -> MappedBatch<E>
    where
        I: IntoIterator<Item = ImportResult<RowRecord>>,
    {
        let mut batch = MappedBatch {
            job_id: self.job_id.clone(),
            processed: 0,
            record_failures: 0,
            queue: Vec::new(),
            errors: self.mapping_errors.clone(),
        };

        for item in rows {
            batch.processed += 1;
            match item {
                Ok(row) => {
                    let (entity, errors) = self.map_row(&row);
                    let had_error = !errors.is_empty();
                    batch.errors.extend(errors);
                    batch.queue.push(QueuedRow {
                        line: row.line,
                        entity,
                        had_error,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "记录解析失败，已跳过");
                    batch.record_failures += 1;
                    let line = batch.processed;
                    batch.errors.push(e.to_line_error(&self.job_id, line, None));
                }
            }
        }

        batch
    }

    /// 完整映射流程: map_all + 单次批量落库
    pub fn run<I, P>(&self, rows: I, persister: &P) -> MappingOutcome
    where
        I: IntoIterator<Item = ImportResult<RowRecord>>,
        P: EntityPersister<E> + ?Sized,
    {
        self.map_all(rows).persist(persister)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::State;
    use crate::repository::error::{RepositoryError, RepositoryResult};
    use crate::repository::master_data_repo::PersistOutcome;

    #[test]
    fn test_coerce_is_culture_invariant() {
        assert_eq!(coerce(FieldKind::Decimal, " -23.55 "), Ok(FieldValue::Decimal(-23.55)));
        assert!(coerce(FieldKind::Decimal, "-23,55").is_err());
        assert!(coerce(FieldKind::Decimal, "NaN").is_err());
        assert!(coerce(FieldKind::Decimal, "inf").is_err());
    }

    #[test]
    fn test_coerce_int_accepts_spreadsheet_floats() {
        assert_eq!(coerce(FieldKind::Int, "120"), Ok(FieldValue::Int(120)));
        assert_eq!(coerce(FieldKind::Int, "120.0"), Ok(FieldValue::Int(120)));
        assert!(coerce(FieldKind::Int, "12.5").is_err());
        assert!(coerce(FieldKind::Int, "abc").is_err());
    }

    #[test]
    fn test_coerce_bool_labels() {
        assert_eq!(coerce(FieldKind::Bool, "Sim"), Ok(FieldValue::Bool(true)));
        assert_eq!(coerce(FieldKind::Bool, "não"), Ok(FieldValue::Bool(false)));
        assert_eq!(coerce(FieldKind::Bool, "0"), Ok(FieldValue::Bool(false)));
        assert!(coerce(FieldKind::Bool, "talvez").is_err());
    }

    #[test]
    fn test_empty_value_is_null() {
        assert_eq!(coerce(FieldKind::Int, "   "), Ok(FieldValue::Null));
        assert_eq!(coerce(FieldKind::Text, ""), Ok(FieldValue::Null));
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("TotalBeds"), normalize_field_name("total_beds"));
        assert_eq!(normalize_field_name(" IBGE_Code "), "ibgecode");
    }

    #[test]
    fn test_into_i32_range() {
        assert_eq!(FieldValue::Int(5).into_i32(), Ok(Some(5)));
        assert_eq!(FieldValue::Null.into_i32(), Ok(None));
        assert!(FieldValue::Int(i64::MAX).into_i32().is_err());
    }

    // ===== 批量落库 =====

    struct RejectingPersister;

    impl EntityPersister<State> for RejectingPersister {
        fn persist_batch(
            &self,
            _job_id: &str,
            _entities: &[State],
        ) -> RepositoryResult<PersistOutcome> {
            Err(RepositoryError::DatabaseQueryError("disk I/O error".to_string()))
        }
    }

    fn state_engine() -> FieldMappingEngine<State> {
        FieldMappingEngine::new(
            "job-1",
            &[
                FieldMapping::new("Codigo", "code"),
                FieldMapping::new("Nome", "name"),
                FieldMapping::new("UF", "uf"),
            ],
        )
    }

    fn state_row(line: usize, code: &str, uf: &str) -> ImportResult<RowRecord> {
        Ok(RowRecord::new(line)
            .with_value("Codigo", code)
            .with_value("Nome", "Estado")
            .with_value("UF", uf))
    }

    #[test]
    fn test_conversion_failure_names_field_and_kind() {
        let row = RowRecord::new(6).with_value("Codigo", "trinta");
        let (state, errors) = state_engine().map_row(&row);
        assert_eq!(state.code, 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 6);
        assert_eq!(errors[0].field, "code");
        assert!(errors[0].message.starts_with("cannot convert to integer:"));
        assert_eq!(errors[0].raw_value.as_deref(), Some("trinta"));
    }

    #[test]
    fn test_batch_failure_fails_every_queued_line() {
        let rows = vec![
            state_row(1, "35", "SP"),
            state_row(2, "trinta", "RJ"),
            Err(ImportError::CsvParseError {
                line: 3,
                message: "invalid utf-8".to_string(),
            }),
            state_row(4, "31", "MG"),
        ];

        let batch = state_engine().map_all(rows);
        assert_eq!(batch.queued(), 3);

        let outcome = batch.persist(&RejectingPersister);
        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.imported, 0);
        assert_eq!(outcome.duplicated, 0);
        // 3 个入队行 + 1 条解析失败记录
        assert_eq!(outcome.failed, 4);

        let mut batch_lines: Vec<i64> = outcome
            .errors
            .iter()
            .filter(|e| e.message.starts_with("batch persistence failed"))
            .map(|e| e.line)
            .collect();
        batch_lines.sort_unstable();
        assert_eq!(batch_lines, vec![1, 2, 4]);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.line == 4 && e.message == "batch persistence failed: 数据库查询失败: disk I/O error"));

        // 字段错误与解析错误仍保留
        assert!(outcome.errors.iter().any(|e| e.line == 2 && e.field == "code"));
        assert!(outcome.errors.iter().any(|e| e.line == 3 && e.field.is_empty()));
        assert_eq!(outcome.errors.len(), 5);
    }

    #[test]
    fn test_only_unparseable_records_skip_persistence() {
        let rows = vec![Err(ImportError::CsvParseError {
            line: 1,
            message: "unequal lengths".to_string(),
        })];
        let outcome = state_engine().run(rows, &RejectingPersister);
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
    }
}
