mod common;

use std::{sync::Arc, thread};

use bce_api::{
    AsyncRequest, CipherCtx, CipherRequest, Enqueued, HashRequest, RequestBody, RequestFlags,
    ScatterList,
};
use bce_core::{
    Base64Op, BaseAlg, CeConfig, CeError, CipherAlg, CipherFamily, CipherMode, Direction, HashAlg,
};
use memory_addr::PhysAddr;
use common::{Collector, ManualWorkQueue, ThreadWorkQueue, fixture};

const KEY: [u8; 16] = [0x2b; 16];

fn cipher_req(buf: &mut [u8], notify: Arc<dyn bce_api::RequestNotify>, flags: RequestFlags) -> AsyncRequest {
    let ctx = CipherCtx::new(CipherFamily::Aes, CipherMode::Ecb, Direction::Encrypt, &KEY).unwrap();
    let nbytes = buf.len();
    AsyncRequest::cipher(
        CipherRequest {
            ctx,
            src: unsafe { ScatterList::from_buf(buf) },
            dst: None,
            nbytes,
        },
        flags,
        notify,
    )
}

fn hash_req(buf: &mut [u8], notify: Arc<dyn bce_api::RequestNotify>) -> AsyncRequest {
    let nbytes = buf.len();
    let mut req = HashRequest::new(HashAlg::Sha1, unsafe { ScatterList::from_buf(buf) }, nbytes);
    req.set_init(HashAlg::Sha1.standard_init()).unwrap();
    AsyncRequest::hash(req, RequestFlags::MAY_SLEEP, notify)
}

#[test]
fn fifo_order_with_single_activation() {
    let f = fixture::<ManualWorkQueue>(false, CeConfig::default());
    let sink = Collector::new();
    let mut bufs = vec![[0u8; 64]; 5];
    for (id, buf) in bufs.iter_mut().enumerate() {
        let req = if id % 2 == 0 {
            cipher_req(buf, sink.notify(id), RequestFlags::empty())
        } else {
            hash_req(buf, sink.notify(id))
        };
        assert_eq!(f.inst.enqueue(req), Ok(Enqueued::InProgress));
    }
    assert_eq!(f.wq.scheduled(), 1);
    assert_eq!(f.inst.pending(), 5);
    assert!(f.inst.is_busy());

    f.wq.run_all();
    assert_eq!(sink.ids(), [0, 1, 2, 3, 4]);
    assert!(sink.take().iter().all(|d| d.result.is_ok()));
    assert!(!f.inst.is_busy());
    assert_eq!(f.dev.stats().triggers, 5);

    // 队列排空后重新提交会再调度一次
    f.inst.enqueue(hash_req(&mut bufs[0], sink.notify(5))).unwrap();
    assert_eq!(f.wq.scheduled(), 2);
    f.wq.run_all();
    assert_eq!(sink.ids(), [5]);
}

#[test]
fn backlog_notified_once_per_request() {
    let f = fixture::<ManualWorkQueue>(
        false,
        CeConfig {
            queue_len: 2,
            ..CeConfig::default()
        },
    );
    let sink = Collector::new();
    let mut bufs = vec![[0u8; 16]; 5];
    let mut results = Vec::new();
    for (id, buf) in bufs.iter_mut().enumerate() {
        let flags = if id == 4 {
            RequestFlags::empty()
        } else {
            RequestFlags::MAY_BACKLOG
        };
        results.push(f.inst.enqueue(cipher_req(buf, sink.notify(id), flags)));
    }
    assert_eq!(
        results,
        [
            Ok(Enqueued::InProgress),
            Ok(Enqueued::InProgress),
            Ok(Enqueued::Backlogged),
            Ok(Enqueued::Backlogged),
            Err(CeError::QueueFull),
        ]
    );

    f.wq.run_all();
    assert_eq!(sink.ids(), [0, 1, 2, 3]);
    assert_eq!(*sink.backlogged.lock().unwrap(), [2, 3]);
    assert_eq!(f.dev.stats().triggers, 4);
}

#[test]
fn unsupported_class_fails_only_that_request() {
    let f = fixture::<ManualWorkQueue>(false, CeConfig::default());
    let sink = Collector::new();
    let mut a = [0u8; 64];
    let mut b = [0u8; 64];

    let mut hash = HashRequest::new(HashAlg::Sha256, unsafe { ScatterList::from_buf(&mut a) }, 64);
    hash.set_init(HashAlg::Sha256.standard_init()).unwrap();
    // 声明为 cipher 类型却携带 hash 内容
    let bogus = AsyncRequest::new(
        0x0000_0004,
        RequestFlags::empty(),
        RequestBody::Hash(hash),
        sink.notify(0),
    );
    f.inst.enqueue(bogus).unwrap();
    f.inst.enqueue(hash_req(&mut b, sink.notify(1))).unwrap();
    f.wq.run_all();

    let done = sink.take();
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].result, Err(CeError::UnsupportedRequestClass));
    assert_eq!(done[1].result, Ok(()));
    assert_eq!(f.dev.stats().triggers, 1);
}

#[test]
fn validation_errors_returned_synchronously() {
    let f = fixture::<ManualWorkQueue>(false, CeConfig::default());
    let sink = Collector::new();

    let mut buf = [0u8; 40];
    assert_eq!(
        f.inst.enqueue(cipher_req(&mut buf, sink.notify(0), RequestFlags::empty())),
        Err(CeError::BlockLengthMismatch)
    );

    let mut buf = [0u8; 32];
    let secure = AsyncRequest::cipher(
        CipherRequest {
            ctx: CipherCtx::with_secure_key(CipherAlg::Aes128Cbc, Direction::Encrypt),
            src: unsafe { ScatterList::from_buf(&mut buf) },
            dst: None,
            nbytes: 32,
        },
        RequestFlags::empty(),
        sink.notify(1),
    );
    assert_eq!(f.inst.enqueue(secure), Err(CeError::KeyUnavailable));

    let mut buf = [0u8; 64];
    let no_init = AsyncRequest::hash(
        HashRequest::new(HashAlg::Sha1, unsafe { ScatterList::from_buf(&mut buf) }, 64),
        RequestFlags::empty(),
        sink.notify(2),
    );
    assert_eq!(f.inst.enqueue(no_init), Err(CeError::InvalidArgument));

    assert_eq!(f.wq.scheduled(), 0);
    assert_eq!(f.inst.pending(), 0);
    f.wq.run_all();
    assert_eq!(sink.count(), 0);
    assert_eq!(f.dev.stats().triggers, 0);
}

#[test]
fn concurrent_enqueue_activates_one_worker() {
    let f = fixture::<ManualWorkQueue>(false, CeConfig::default());
    let sink = Collector::new();
    let inst = f.inst.clone();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let inst = inst.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..4 {
                    let buf: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
                    let req = hash_req(buf, sink.notify(t * 4 + i));
                    inst.enqueue(req).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(f.wq.scheduled(), 1);
    f.wq.run_all();
    let mut ids = sink.ids();
    ids.sort_unstable();
    assert_eq!(ids, (0..32).collect::<Vec<_>>());
}

#[test]
fn stress_never_overlaps_descriptors() {
    let f = fixture::<ThreadWorkQueue>(true, CeConfig::default());
    let sink = Collector::new();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let inst = f.inst.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..6 {
                    let buf: &'static mut [u8] = Box::leak(vec![i as u8; 48].into_boxed_slice());
                    // 前 16 字节和后 32 字节分成两段，每个请求触发两次
                    let ctx = CipherCtx::new(
                        CipherFamily::Sm4,
                        CipherMode::Cbc,
                        Direction::Encrypt,
                        &KEY,
                    )
                    .unwrap();
                    let req = AsyncRequest::cipher(
                        CipherRequest {
                            ctx,
                            src: unsafe { ScatterList::split(buf, &[16]) },
                            dst: None,
                            nbytes: 48,
                        },
                        RequestFlags::MAY_BACKLOG,
                        sink.notify(t * 6 + i),
                    );
                    inst.enqueue(req).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    sink.wait_for(48);
    let stats = f.dev.stats();
    assert_eq!(stats.triggers, 96);
    assert_eq!(stats.max_outstanding, 1);
    assert_eq!(stats.overlaps, 0);
    assert!(sink.take().iter().all(|d| d.result.is_ok()));
    assert!(f.dma.balanced());
}

#[test]
fn base64_interleaves_with_queued_requests() {
    let f = fixture::<ThreadWorkQueue>(true, CeConfig::default());
    let sink = Collector::new();

    let encoder = {
        let inst = f.inst.clone();
        thread::spawn(move || {
            let input = *b"crypto engine";
            let mut out = [0u8; 20];
            for _ in 0..100 {
                out.fill(0);
                inst.base64(&Base64Op {
                    alg: BaseAlg::Base64,
                    dir: Direction::ENCODE,
                    src: PhysAddr::from(input.as_ptr() as usize),
                    dst: PhysAddr::from(out.as_mut_ptr() as usize),
                    input: &input,
                    dst_cap: out.len(),
                })
                .unwrap();
                assert_eq!(&out, b"Y3J5cHRvIGVuZ2luZQ==");
            }
        })
    };
    let submitters: Vec<_> = (0..4)
        .map(|t| {
            let inst = f.inst.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..6 {
                    let id = t * 6 + i;
                    let req = if i % 2 == 0 {
                        let buf: &'static mut [u8] = Box::leak(vec![i as u8; 48].into_boxed_slice());
                        let ctx = CipherCtx::new(CipherFamily::Aes, CipherMode::Ecb, Direction::Encrypt, &KEY)
                            .unwrap();
                        AsyncRequest::cipher(
                            CipherRequest {
                                ctx,
                                src: unsafe { ScatterList::split(buf, &[16]) },
                                dst: None,
                                nbytes: 48,
                            },
                            RequestFlags::MAY_BACKLOG,
                            sink.notify(id),
                        )
                    } else {
                        let buf: &'static mut [u8] = Box::leak(vec![i as u8; 64].into_boxed_slice());
                        hash_req(buf, sink.notify(id))
                    };
                    inst.enqueue(req).unwrap();
                }
            })
        })
        .collect();
    for h in submitters {
        h.join().unwrap();
    }
    encoder.join().unwrap();

    sink.wait_for(24);
    assert!(sink.take().iter().all(|d| d.result.is_ok()));
    let stats = f.dev.stats();
    // 12 个 cipher 请求各两段，12 个 hash 请求各一段，再加 100 次 base64
    assert_eq!(stats.triggers, 12 * 2 + 12 + 100);
    assert_eq!(stats.max_outstanding, 1);
    assert_eq!(stats.overlaps, 0);
    assert!(f.dma.balanced());
}

#[test]
fn destroy_fails_queued_requests() {
    let f = fixture::<ManualWorkQueue>(false, CeConfig::default());
    let sink = Collector::new();
    let mut a = [0u8; 64];
    let mut b = [0u8; 16];
    f.inst.enqueue(hash_req(&mut a, sink.notify(0))).unwrap();
    f.inst
        .enqueue(cipher_req(&mut b, sink.notify(1), RequestFlags::empty()))
        .unwrap();
    assert_eq!(f.wq.scheduled(), 1);

    f.inst.destroy();
    let done = sink.take();
    assert_eq!(done.iter().map(|d| d.id).collect::<Vec<_>>(), [0, 1]);
    assert!(done.iter().all(|d| d.result == Err(CeError::NoDevice)));
    assert_eq!(f.inst.pending(), 0);

    // 已调度的工作函数直接退出，不再碰硬件
    f.wq.run_all();
    assert!(!f.inst.is_busy());
    assert_eq!(sink.count(), 0);
    assert!(!f.platform.irq_enabled());
    assert!(!f.inst.engine().is_triggered());
    assert_eq!(f.dev.stats().triggers, 0);

    assert_eq!(
        f.inst.enqueue(hash_req(&mut a, sink.notify(2))),
        Err(CeError::NoDevice)
    );
    assert_eq!(f.wq.scheduled(), 1);
}
