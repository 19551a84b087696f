use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use ruleflow_core::EngineResult;

use crate::lifecycle_listener::LifecycleListener;
use crate::poller::RulePoller;
use crate::reminder_planner::ReminderPlanner;

/// 调度侧服务：持有轮询器、提醒规划器与生命周期监听器的运行循环
pub struct DispatcherService {
    poller: Arc<RulePoller>,
    planner: Arc<ReminderPlanner>,
    lifecycle_listener: Arc<LifecycleListener>,
    tick_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl DispatcherService {
    pub fn new(
        poller: Arc<RulePoller>,
        planner: Arc<ReminderPlanner>,
        lifecycle_listener: Arc<LifecycleListener>,
        tick_interval_seconds: u64,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            poller,
            planner,
            lifecycle_listener,
            tick_interval: Duration::from_secs(tick_interval_seconds.max(1)),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// 启动全部后台循环
    pub async fn start(&mut self) -> EngineResult<()> {
        info!(
            "启动调度服务, tick间隔 {}s",
            self.tick_interval.as_secs()
        );

        let poller = self.poller.clone();
        let planner = self.planner.clone();
        let tick_interval = self.tick_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now();
                        if let Err(e) = poller.tick(now).await {
                            error!("规则轮询tick出错: {e}");
                        }
                        if let Err(e) = planner.tick(now).await {
                            error!("提醒规划tick出错: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("轮询循环收到停止信号");
                        break;
                    }
                }
            }
        }));

        let listener = self.lifecycle_listener.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = listener.listen().await {
                error!("生命周期监听循环出错: {e}");
            }
        }));

        Ok(())
    }

    /// 停止全部循环并等待退出
    pub async fn stop(&mut self) {
        info!("调度服务停止中");
        let _ = self.shutdown_tx.send(());
        self.lifecycle_listener.stop().await;

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("调度后台任务退出异常: {e}");
            }
        }
        info!("调度服务已停止");
    }
}
