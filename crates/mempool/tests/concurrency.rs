use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    ptr::NonNull,
    slice,
    sync::Mutex as StdMutex,
    thread,
};

use lock_api::{Mutex, RawMutex};
use mempool::{Allocator, BitmapPool, LockedAllocator, WORD_BITS, Word};
use proptest::prelude::*;

const ELEMENT: usize = 8;
const NUM_ELEMENTS: usize = 2 * WORD_BITS + 1;

fn with_pool<F, T>(test_fn: F) -> T
where
    F: FnOnce(BitmapPool<'_>, usize) -> T,
{
    let mut buffer = vec![0u8; ELEMENT * NUM_ELEMENTS];
    let mut allocation = vec![0 as Word; bitmap::words_for(NUM_ELEMENTS)];
    let mut boundary = vec![0 as Word; bitmap::words_for(NUM_ELEMENTS)];
    let base = buffer.as_ptr().addr();
    let pool = BitmapPool::from_buffers(
        &mut buffer,
        &mut allocation,
        &mut boundary,
        ELEMENT,
        NUM_ELEMENTS,
    )
    .unwrap();
    test_fn(pool, base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Alloc { size: usize, offset: Option<usize> },
    Free { offset: usize },
}

/// Logs every call in the order the lock admitted it.
struct Recorder<A> {
    inner: A,
    base: usize,
    events: RefCell<Vec<Event>>,
}

unsafe impl<A> Allocator for Recorder<A>
where
    A: Allocator,
{
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.inner.alloc(size);
        self.events.borrow_mut().push(Event::Alloc {
            size,
            offset: ptr.map(|ptr| ptr.as_ptr().addr() - self.base),
        });
        ptr
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            self.events.borrow_mut().push(Event::Free {
                offset: ptr.addr() - self.base,
            });
        }
        unsafe { self.inner.free(ptr) };
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..=48).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Free),
    ]
}

fn plans_strategy() -> impl Strategy<Value = Vec<Vec<Op>>> {
    prop::collection::vec(prop::collection::vec(op_strategy(), 0..150), 2..=4)
}

/// Records `[start, end)` as live, failing if it overlaps a live range.
fn insert_disjoint(ranges: &StdMutex<BTreeMap<usize, usize>>, start: usize, end: usize) {
    let mut ranges = ranges.lock().unwrap();
    if let Some((&other_start, &other_end)) = ranges.range(..end).next_back() {
        assert!(
            other_end <= start,
            "[{start:#x}, {end:#x}) overlaps live [{other_start:#x}, {other_end:#x})"
        );
    }
    ranges.insert(start, end);
}

fn worker(
    id: u8,
    allocator: &(dyn Allocator + Sync),
    ranges: &StdMutex<BTreeMap<usize, usize>>,
    plan: &[Op],
) {
    let mut live: Vec<(NonNull<u8>, usize)> = vec![];
    for op in plan {
        match *op {
            Op::Alloc(size) => {
                let Some(ptr) = allocator.alloc(size) else {
                    continue;
                };
                let start = ptr.as_ptr().addr();
                insert_disjoint(ranges, start, start + size);
                unsafe { ptr.as_ptr().write_bytes(id, size) };
                live.push((ptr, size));
            }
            Op::Free(index) if !live.is_empty() => {
                let (ptr, size) = live.swap_remove(index % live.len());
                let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(
                    bytes.iter().all(|&byte| byte == id),
                    "block at {ptr:p} was written by another thread"
                );
                // unregister first: once freed the range may be handed out again
                ranges.lock().unwrap().remove(&start_of(ptr));
                unsafe { allocator.free(ptr.as_ptr()) };
            }
            Op::Free(_) => {}
        }
    }
}

fn start_of(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr().addr()
}

type Snapshot = (Vec<Word>, Vec<Word>, usize);

fn snapshot(pool: &BitmapPool<'_>) -> Snapshot {
    let (allocation, boundary) =
        pool.with_bitmaps(|allocation, boundary| (allocation.to_vec(), boundary.to_vec()));
    (allocation, boundary, pool.allocated_elements())
}

/// Runs one thread per plan against a shared locked pool, then replays the
/// admitted call order on a fresh pool and compares the outcome.
fn run_concurrent<R>(plans: &[Vec<Op>])
where
    R: RawMutex + Sync,
{
    let (events, concurrent) = with_pool(|pool, base| {
        let mutex = Mutex::<R, _>::new(Recorder {
            inner: pool,
            base,
            events: RefCell::default(),
        });
        let locked = LockedAllocator::new(&mutex);
        let ranges = StdMutex::new(BTreeMap::new());
        thread::scope(|s| {
            for (id, plan) in plans.iter().enumerate() {
                let (locked, ranges) = (&locked, &ranges);
                let id = u8::try_from(id + 1).unwrap();
                s.spawn(move || worker(id, locked, ranges, plan));
            }
        });

        let recorder = mutex.into_inner();
        let concurrent = snapshot(&recorder.inner);
        (recorder.events.into_inner(), concurrent)
    });

    let serial = with_pool(|pool, base| {
        let mut live = HashMap::new();
        for event in &events {
            match *event {
                Event::Alloc { size, offset } => {
                    let ptr = pool.alloc(size);
                    assert_eq!(ptr.map(|ptr| start_of(ptr) - base), offset);
                    if let (Some(ptr), Some(offset)) = (ptr, offset) {
                        live.insert(offset, ptr);
                    }
                }
                Event::Free { offset } => {
                    let ptr: NonNull<u8> = live.remove(&offset).unwrap();
                    unsafe { pool.free(ptr.as_ptr()) };
                }
            }
        }
        snapshot(&pool)
    });

    assert_eq!(concurrent, serial);
}

#[test]
fn test_many_threads_fixed_plans() {
    let plans = (0..8)
        .map(|thread| {
            (0..400)
                .map(|step: usize| {
                    if step % 3 == 2 {
                        Op::Free(step * 7 + thread)
                    } else {
                        Op::Alloc((thread * 11 + step * 5) % 40 + 1)
                    }
                })
                .collect()
        })
        .collect::<Vec<Vec<Op>>>();
    run_concurrent::<spin::Mutex<()>>(&plans);
    run_concurrent::<parking_lot::RawMutex>(&plans);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_spin_locked_matches_serial_replay(plans in plans_strategy()) {
        run_concurrent::<spin::Mutex<()>>(&plans);
    }

    #[test]
    fn prop_parking_lot_locked_matches_serial_replay(plans in plans_strategy()) {
        run_concurrent::<parking_lot::RawMutex>(&plans);
    }
}
