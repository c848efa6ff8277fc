#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bce_api::{
    CeInstance, DmaDirection, DmaMapper, DmaSegment, LinearMapper, RequestBody, RequestNotify,
    ScatterList, WorkQueue,
};
use bce_core::{CeConfig, CeError, CePlatform, CeResult, IrqHandler, dummy::DummyCe};

pub type Instance = CeInstance<Arc<DummyCe>>;

/// 每次调度起一个线程
#[derive(Default)]
pub struct ThreadWorkQueue {
    pub scheduled: AtomicUsize,
}

impl WorkQueue for ThreadWorkQueue {
    fn schedule(&self, work: Box<dyn FnOnce() + Send>) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        thread::spawn(work);
    }
}

/// 只记录，由测试手动执行
#[derive(Default)]
pub struct ManualWorkQueue {
    works: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    pub scheduled: AtomicUsize,
}

impl ManualWorkQueue {
    pub fn run_all(&self) {
        loop {
            let works: Vec<_> = self.works.lock().unwrap().drain(..).collect();
            if works.is_empty() {
                return;
            }
            for work in works {
                work();
            }
        }
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl WorkQueue for ManualWorkQueue {
    fn schedule(&self, work: Box<dyn FnOnce() + Send>) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.works.lock().unwrap().push(work);
    }
}

/// 把软件设备的中断接到实例上
pub struct SimPlatform {
    dev: Arc<DummyCe>,
    enabled: Arc<AtomicBool>,
    /// 为 true 时在另一个线程上稍后送出中断
    threaded: bool,
    start: Instant,
}

impl SimPlatform {
    pub fn new(dev: Arc<DummyCe>, threaded: bool) -> Arc<Self> {
        Arc::new(Self {
            dev,
            enabled: Arc::new(AtomicBool::new(true)),
            threaded,
            start: Instant::now(),
        })
    }

    pub fn irq_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl CePlatform for SimPlatform {
    fn request_irq(&self, _irq: usize, handler: IrqHandler) -> CeResult<()> {
        let handler: Arc<dyn Fn() + Send + Sync> = Arc::from(handler);
        let enabled = self.enabled.clone();
        let threaded = self.threaded;
        self.dev.connect_irq(Box::new(move || {
            if !enabled.load(Ordering::SeqCst) {
                return;
            }
            if threaded {
                let handler = handler.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_micros(200));
                    handler();
                });
            } else {
                handler();
            }
        }));
        Ok(())
    }

    fn enable_irq(&self, _irq: usize) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable_irq(&self, _irq: usize) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn relax(&self) {
        thread::yield_now();
    }

    fn now_ms(&self) -> Option<u64> {
        Some(self.start.elapsed().as_millis() as u64)
    }
}

/// 记录 map / unmap 次数，可以让第 n 次 map 失败
pub struct CountingMapper {
    pub maps: AtomicUsize,
    pub unmaps: AtomicUsize,
    fail_at: Option<usize>,
}

impl CountingMapper {
    pub fn new() -> Arc<Self> {
        Self::failing_at(None)
    }

    pub fn failing_at(fail_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
            fail_at,
        })
    }

    pub fn balanced(&self) -> bool {
        self.maps.load(Ordering::SeqCst) == self.unmaps.load(Ordering::SeqCst)
    }
}

impl DmaMapper for CountingMapper {
    fn map_sg(&self, sg: &ScatterList, dir: DmaDirection) -> CeResult<Vec<DmaSegment>> {
        let n = self.maps.load(Ordering::SeqCst);
        if Some(n) == self.fail_at {
            return Err(CeError::MappingFailure);
        }
        self.maps.fetch_add(1, Ordering::SeqCst);
        LinearMapper::identity().map_sg(sg, dir)
    }

    fn unmap_sg(&self, _sg: &ScatterList, _segs: &[DmaSegment], _dir: DmaDirection) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// 完成记录
pub struct Done {
    pub id: usize,
    pub body: RequestBody,
    pub result: CeResult<()>,
}

#[derive(Default)]
pub struct Collector {
    pub done: Mutex<Vec<Done>>,
    pub backlogged: Mutex<Vec<usize>>,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify(self: &Arc<Self>, id: usize) -> Arc<dyn RequestNotify> {
        Arc::new(Tagged {
            id,
            sink: self.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.done.lock().unwrap().len()
    }

    /// 等待 n 个请求完成
    pub fn wait_for(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.count() < n {
            assert!(Instant::now() < deadline, "only {} of {} completed", self.count(), n);
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn take(&self) -> Vec<Done> {
        std::mem::take(&mut *self.done.lock().unwrap())
    }

    pub fn ids(&self) -> Vec<usize> {
        self.done.lock().unwrap().iter().map(|d| d.id).collect()
    }
}

struct Tagged {
    id: usize,
    sink: Arc<Collector>,
}

impl RequestNotify for Tagged {
    fn backlog(&self) {
        self.sink.backlogged.lock().unwrap().push(self.id);
    }

    fn complete(&self, body: RequestBody, result: CeResult<()>) {
        self.sink.done.lock().unwrap().push(Done {
            id: self.id,
            body,
            result,
        });
    }
}

pub struct Fixture<W> {
    pub dev: Arc<DummyCe>,
    pub platform: Arc<SimPlatform>,
    pub wq: Arc<W>,
    pub dma: Arc<CountingMapper>,
    pub inst: Arc<Instance>,
}

pub fn fixture<W: WorkQueue + Default + 'static>(threaded_irq: bool, config: CeConfig) -> Fixture<W> {
    fixture_with(threaded_irq, config, CountingMapper::new())
}

pub fn fixture_with<W: WorkQueue + Default + 'static>(
    threaded_irq: bool,
    config: CeConfig,
    dma: Arc<CountingMapper>,
) -> Fixture<W> {
    let dev = Arc::new(DummyCe::new());
    let platform = SimPlatform::new(dev.clone(), threaded_irq);
    let wq = Arc::new(W::default());
    let inst = CeInstance::new(
        dev.clone(),
        42,
        platform.clone(),
        wq.clone(),
        dma.clone(),
        config,
    )
    .unwrap();
    Fixture {
        dev,
        platform,
        wq,
        dma,
        inst,
    }
}
