// ==========================================
// 水资源风险监测平台 - 导入管理器
// ==========================================
// 职责: 对外入口
// - 按格式类型选择适配器，执行单任务导入
// - 批量导入（有界工作池并发，结果保持提交顺序）
// - 进程级导入历史（滚动上限）与运行统计
// - 样例数据、定时导入钩子
// 并发: 历史与统计在同一把锁内更新，读取返回快照
// ==========================================

use crate::config::settings::ImportSettings;
use crate::domain::result::{BatchResult, ImportHistoryRecord, ImportResult, ImportStats};
use crate::domain::task::{ImportTask, TaskDescriptor};
use crate::domain::types::{FormatType, ModuleName};
use crate::importer::adapter_trait::stream_from_vec;
use crate::importer::adapters::AdapterRegistry;
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::executor::ImportExecutor;
use crate::importer::sample_data::{self, SAMPLE_DATA_SOURCE};
use crate::repository::RecordSink;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 历史 + 统计（同一临界区更新）
#[derive(Default)]
struct Ledger {
    history: VecDeque<ImportHistoryRecord>,
    stats: ImportStats,
}

// ==========================================
// ImportManager
// ==========================================
#[derive(Clone)]
pub struct ImportManager {
    registry: Arc<AdapterRegistry>,
    executor: ImportExecutor,
    settings: Arc<ImportSettings>,
    ledger: Arc<Mutex<Ledger>>,
    schedules: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ImportManager {
    /// 使用内置适配器创建管理器
    pub fn new(settings: ImportSettings, sink: Arc<dyn RecordSink>) -> ImportOutcome<Self> {
        let registry = AdapterRegistry::with_defaults(&settings)?;
        Ok(Self::with_registry(settings, registry, sink))
    }

    /// 使用自定义适配器表创建管理器
    pub fn with_registry(settings: ImportSettings, registry: AdapterRegistry, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            registry: Arc::new(registry),
            executor: ImportExecutor::new(sink),
            settings: Arc::new(settings),
            ledger: Arc::new(Mutex::new(Ledger::default())),
            schedules: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn supported_formats(&self) -> Vec<FormatType> {
        self.registry.formats()
    }

    pub fn supported_modules(&self) -> Vec<ModuleName> {
        ModuleName::ALL.to_vec()
    }

    // ==========================================
    // 单任务导入
    // ==========================================

    /// 执行单个导入任务
    ///
    /// # 返回
    /// - Ok(ImportResult): 任务已执行（数据源错误体现在 source_error 中）
    /// - Err: 调用方错误（未知格式、参数不合法），任务未执行且不计入历史
    #[instrument(skip(self, task), fields(task_id = %task.task_id()))]
    pub async fn import_single(&self, task: ImportTask) -> ImportOutcome<ImportResult> {
        let adapter = self.registry.get(task.format_type())?;
        if let Err(e) = adapter.validate_options(task.data_source(), task.options()) {
            warn!(error = %e, "任务参数校验失败");
            return Err(e);
        }
        let rules = ImportExecutor::resolve_rules(task.module_name(), adapter.as_ref(), task.options())?;

        let result = self.executor.execute(&task, adapter.as_ref(), &rules).await;
        self.record(task, &result);
        Ok(result)
    }

    /// 校验松散任务描述后导入
    pub async fn import_descriptor(&self, descriptor: TaskDescriptor) -> ImportOutcome<ImportResult> {
        let task = ImportTask::try_from(descriptor)?;
        self.import_single(task).await
    }

    // ==========================================
    // 批量导入
    // ==========================================

    /// 批量导入
    ///
    /// # 参数
    /// - tasks: 任务列表
    /// - parallel: true 时按 max_workers 并发执行；false 时依次执行
    ///
    /// # 返回
    /// - BatchResult: results 与提交顺序一致；单任务失败不影响其他任务
    pub async fn batch_import(&self, tasks: Vec<ImportTask>, parallel: bool) -> BatchResult {
        if tasks.is_empty() {
            return BatchResult::default();
        }
        let total = tasks.len();
        let workers = if parallel { self.settings.max_workers.max(1) } else { 1 };
        info!(total, workers, parallel, "开始批量导入");

        let results = if parallel {
            let semaphore = Arc::new(Semaphore::new(workers));
            let mut fallbacks = Vec::with_capacity(total);
            let mut handles = Vec::with_capacity(total);
            for task in tasks {
                fallbacks.push(task.clone());
                handles.push(self.spawn_batch_task(task, Some(semaphore.clone())));
            }
            join_all(handles)
                .await
                .into_iter()
                .zip(fallbacks)
                .map(|(joined, task)| Self::collect_joined(joined, &task))
                .collect()
        } else {
            let mut results = Vec::with_capacity(total);
            for task in tasks {
                let fallback = task.clone();
                let joined = self.spawn_batch_task(task, None).await;
                results.push(Self::collect_joined(joined, &fallback));
            }
            results
        };

        let batch = BatchResult::from_results(results);
        info!(
            total = batch.total_tasks,
            completed = batch.completed_tasks,
            failed = batch.failed_tasks,
            "批量导入完成"
        );
        batch
    }

    fn spawn_batch_task(&self, task: ImportTask, semaphore: Option<Arc<Semaphore>>) -> JoinHandle<ImportResult> {
        let manager = self.clone();
        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            let started_at = Utc::now();
            let clock = Instant::now();
            match manager.import_single(task.clone()).await {
                Ok(result) => result,
                Err(e) => ImportResult::source_failure(&task, e.to_string(), started_at, clock.elapsed()),
            }
        })
    }

    /// 工作任务 panic / 被取消时同样产出一条失败结果
    fn collect_joined(joined: Result<ImportResult, tokio::task::JoinError>, task: &ImportTask) -> ImportResult {
        joined.unwrap_or_else(|e| {
            warn!(task_id = %task.task_id(), error = %e, "导入任务异常终止");
            ImportResult::source_failure(task, format!("任务执行异常: {}", e), Utc::now(), Duration::ZERO)
        })
    }

    // ==========================================
    // 历史与统计
    // ==========================================

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, task: ImportTask, result: &ImportResult) {
        let now = Utc::now();
        let limit = self.settings.history_limit;
        let mut ledger = self.lock_ledger();

        ledger.stats.record(result, now);
        ledger.history.push_back(ImportHistoryRecord {
            timestamp: now,
            task,
            result: result.clone(),
        });
        while ledger.history.len() > limit {
            ledger.history.pop_front();
        }
    }

    /// 统计快照
    pub fn get_import_stats(&self) -> ImportStats {
        self.lock_ledger().stats.clone()
    }

    /// 最近的导入历史（按时间正序）
    ///
    /// # 参数
    /// - module: 仅返回该模块的记录（None 表示全部）
    /// - limit: 返回条数上限（None 使用 default_history_query_limit）
    pub fn get_import_history(&self, module: Option<ModuleName>, limit: Option<usize>) -> Vec<ImportHistoryRecord> {
        let limit = limit.unwrap_or(self.settings.default_history_query_limit);
        let ledger = self.lock_ledger();
        let matching: Vec<&ImportHistoryRecord> = ledger
            .history
            .iter()
            .filter(|r| module.map_or(true, |m| r.task.module_name() == m))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// 清空历史与统计
    pub fn reset(&self) {
        let mut ledger = self.lock_ledger();
        ledger.history.clear();
        ledger.stats = ImportStats::default();
    }

    // ==========================================
    // 样例数据
    // ==========================================

    /// 生成模块样例数据并走完整导入流程
    pub async fn create_sample_data(&self, module: ModuleName, count: usize) -> ImportOutcome<ImportResult> {
        let task = ImportTask::new(FormatType::NestedDocument, module, SAMPLE_DATA_SOURCE)?;
        let adapter = self.registry.get(task.format_type())?;
        let rules = ImportExecutor::resolve_rules(module, adapter.as_ref(), task.options())?;

        let records = {
            let mut rng = rand::thread_rng();
            sample_data::generate_records(module, count, &mut rng)
        };
        info!(module = %module, count, "生成样例数据");

        let stream = stream_from_vec(records.into_iter().map(Ok).collect());
        let result = self
            .executor
            .run_records(&task, stream, &rules, Utc::now(), Instant::now())
            .await;
        self.record(task, &result);
        Ok(result)
    }

    // ==========================================
    // 定时导入钩子
    // ==========================================

    fn lock_schedules(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.schedules.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 按固定间隔重复执行任务（首次立即执行）
    ///
    /// # 返回
    /// - Ok(schedule_id): `scheduled_<uuid>`
    /// - Err(Internal): 当前不在 tokio 运行时中
    /// - Err(InvalidTask): 间隔为 0
    pub fn schedule_recurring_import(&self, task: ImportTask, interval: Duration) -> ImportOutcome<String> {
        if interval.is_zero() {
            return Err(ImportError::InvalidTask("调度间隔必须大于 0".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ImportError::Internal(format!("定时导入需要运行中的 tokio 运行时: {}", e)))?;

        let schedule_id = format!("scheduled_{}", Uuid::new_v4());
        let manager = self.clone();
        let id = schedule_id.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let run = task.clone().with_task_id(Uuid::new_v4().to_string());
                match manager.import_single(run).await {
                    Ok(result) => info!(
                        schedule_id = %id,
                        imported = result.imported_records,
                        "定时导入完成"
                    ),
                    Err(e) => {
                        warn!(schedule_id = %id, error = %e, "定时任务无效，停止调度");
                        break;
                    }
                }
            }
        });

        info!(schedule_id = %schedule_id, interval_secs = interval.as_secs_f64(), "已注册定时导入");
        self.lock_schedules().insert(schedule_id.clone(), handle);
        Ok(schedule_id)
    }

    /// 取消定时导入
    ///
    /// # 返回
    /// - true: 已取消；false: 不存在该调度
    pub fn cancel_scheduled_import(&self, schedule_id: &str) -> bool {
        match self.lock_schedules().remove(schedule_id) {
            Some(handle) => {
                handle.abort();
                info!(schedule_id, "已取消定时导入");
                true
            }
            None => false,
        }
    }

    /// 仍在运行的调度 ID
    pub fn scheduled_imports(&self) -> Vec<String> {
        let mut schedules = self.lock_schedules();
        schedules.retain(|_, handle| !handle.is_finished());
        let mut ids: Vec<String> = schedules.keys().cloned().collect();
        ids.sort();
        ids
    }
}
