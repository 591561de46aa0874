//! VM memory manager: a size-classed free-list allocator and a parallel
//! mark-and-sweep collector.
//!
//! Every managed allocation is a chunk of the shape
//!
//! ```text
//! [chunk size][TYPE][SIZE_OR_CLS][MARKED_FLAG][payload ...]
//!                                             ^ user pointer
//! ```
//!
//! so the three header slots sit at offsets -3, -2 and -1 of the user
//! pointer. Chunks are quantized to power-of-two size classes and recycled
//! through per-class LIFO free stacks; a pop always hands back zeroed
//! memory, which object construction relies on.
//!
//! A collection traces static class memory, the running operand stack, and
//! every registered interpreter (PDA) and JIT frame on concurrent worker
//! threads, then sweeps unmarked objects back onto their free stacks. The
//! `serial` mode runs the whole cycle inline on the allocating thread with
//! no locking.

use crate::program::{MethodRef, StackDclr, StackProgram};
use rustc_hash::{FxHashMap, FxHashSet};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const WORD: usize = std::mem::size_of::<usize>();

/// Header words between the chunk-size word and the user pointer.
pub const EXTRA_BUF_SIZE: usize = 3;
const TYPE_OFFSET: isize = -3;
const SIZE_OR_CLS_OFFSET: isize = -2;
const MARKED_FLAG_OFFSET: isize = -1;

/// Default collection high-watermark in bytes.
pub const MEM_MAX: usize = 1 << 20;
/// Chunks carved per size class when a free stack runs dry.
pub const MEM_POOL_LIST_MAX: usize = 128;
/// Fruitless cycles tolerated before the watermark grows aggressively.
pub const UNCOLLECTED_COUNT: usize = 7;
/// Productive cycles tolerated before the watermark shrinks.
pub const COLLECTED_COUNT: usize = 16;
/// Sentinel terminating per-class interface id lists.
pub const INF_ENDING: i64 = -2;

/// Header tag of a managed allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MemoryType {
    /// Object instance; `SIZE_OR_CLS` holds the class id.
    Object = 0,
    ByteArray = 1,
    CharArray = 2,
    IntArray = 3,
    FloatArray = 4,
}

impl MemoryType {
    fn from_word(word: usize) -> Option<MemoryType> {
        match word {
            0 => Some(MemoryType::Object),
            1 => Some(MemoryType::ByteArray),
            2 => Some(MemoryType::CharArray),
            3 => Some(MemoryType::IntArray),
            4 => Some(MemoryType::FloatArray),
            _ => None,
        }
    }

    /// Array element width in bytes.
    pub fn element_size(self) -> usize {
        match self {
            MemoryType::ByteArray => 1,
            MemoryType::CharArray => 4,
            MemoryType::Object | MemoryType::IntArray | MemoryType::FloatArray => WORD,
        }
    }
}

/// An interpreter or JIT activation record, registered as a collector root
/// by the mutator that owns it.
#[derive(Debug)]
pub struct StackFrame {
    pub method: MethodRef,
    /// Interpreter frame memory: `[self][and_or?][declaration slots...]`.
    pub mem: *mut usize,
    /// Native frame memory when the method is running compiled code.
    pub jit_mem: *mut usize,
}

/// A running thread's full call stack, registered as a single root.
#[derive(Debug)]
pub struct StackFrameMonitor {
    pub call_stack: *const *const StackFrame,
    pub call_stack_pos: *const isize,
    pub cur_frame: *const *const StackFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameRoot(*const StackFrame);
// SAFETY: frame roots are only dereferenced while the registering mutator
// keeps the frame alive; registration and removal bracket the frame's
// lifetime on the mutator side.
unsafe impl Send for FrameRoot {}
unsafe impl Sync for FrameRoot {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MonitorRoot(*const StackFrameMonitor);
// SAFETY: as for FrameRoot.
unsafe impl Send for MonitorRoot {}
unsafe impl Sync for MonitorRoot {}

#[derive(Debug, Default)]
struct AllocatedSet {
    set: FxHashSet<usize>,
    /// Sum of payload bytes over the set.
    allocation_size: usize,
}

#[derive(Debug, Default)]
struct FreeStore {
    /// Chunk size -> LIFO free stack of chunk base pointers.
    lists: FxHashMap<usize, Vec<usize>>,
    cache_size: usize,
}

pub struct MemoryManager {
    program: Arc<StackProgram>,
    /// Run mark and sweep inline with no locking.
    serial: bool,

    allocated: Mutex<AllocatedSet>,
    marked: Mutex<()>,
    marked_sweep: Mutex<()>,
    free_store: Mutex<FreeStore>,

    pda_frames: Mutex<FxHashSet<FrameRoot>>,
    pda_monitors: Mutex<FxHashSet<MonitorRoot>>,
    jit_frames: Mutex<Vec<FrameRoot>>,

    virtual_methods: RwLock<FxHashMap<(usize, usize, usize), MethodRef>>,

    mem_max_size: AtomicUsize,
    uncollected_count: AtomicUsize,
    collected_count: AtomicUsize,
}

// SAFETY: all shared state is lock- or atomic-guarded; raw pointers held in
// the root registries are governed by the FrameRoot contracts above.
unsafe impl Send for MemoryManager {}
unsafe impl Sync for MemoryManager {}

impl MemoryManager {
    pub fn new(program: Arc<StackProgram>) -> Self {
        Self::with_mode(program, false)
    }

    /// Single-threaded build: every phase runs inline on the allocating
    /// thread.
    pub fn new_serial(program: Arc<StackProgram>) -> Self {
        Self::with_mode(program, true)
    }

    fn with_mode(program: Arc<StackProgram>, serial: bool) -> Self {
        MemoryManager {
            program,
            serial,
            allocated: Mutex::new(AllocatedSet::default()),
            marked: Mutex::new(()),
            marked_sweep: Mutex::new(()),
            free_store: Mutex::new(FreeStore::default()),
            pda_frames: Mutex::new(FxHashSet::default()),
            pda_monitors: Mutex::new(FxHashSet::default()),
            jit_frames: Mutex::new(Vec::new()),
            virtual_methods: RwLock::new(FxHashMap::default()),
            mem_max_size: AtomicUsize::new(MEM_MAX),
            uncollected_count: AtomicUsize::new(0),
            collected_count: AtomicUsize::new(0),
        }
    }

    pub fn allocation_size(&self) -> usize {
        self.allocated.lock().unwrap().allocation_size
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().unwrap().set.len()
    }

    pub fn mem_max_size(&self) -> usize {
        self.mem_max_size.load(Ordering::Relaxed)
    }

    pub fn is_allocated(&self, mem: *const usize) -> bool {
        self.allocated.lock().unwrap().set.contains(&(mem as usize))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a zeroed object instance of `cls_id`. The operand stack and
    /// its live depth are handed through so a triggered collection can scan
    /// the caller's live values.
    pub fn allocate_object(
        &self,
        cls_id: usize,
        op_stack: &[usize],
        collect: bool,
    ) -> *mut usize {
        let Some(cls) = self.program.class(cls_id) else {
            eprintln!(">>> Invalid object allocation: class={cls_id} <<<");
            std::process::exit(1);
        };
        let size = cls.instance_size;

        if collect
            && self.allocation_size() + size > self.mem_max_size.load(Ordering::Relaxed)
        {
            self.collect_all_memory(op_stack);
        }

        let mem = self.get_memory(size + WORD * EXTRA_BUF_SIZE);
        // SAFETY: get_memory returned a chunk with room for the header
        // words ahead of the user pointer.
        let user = unsafe {
            *mem = MemoryType::Object as usize;
            *mem.add(1) = cls_id;
            mem.add(EXTRA_BUF_SIZE)
        };

        let mut allocated = self.allocated.lock().unwrap();
        allocated.allocation_size += size;
        allocated.set.insert(user as usize);
        drop(allocated);

        tracing::trace!(class = cls_id, size, "allocated object");
        user
    }

    /// Allocate a zeroed array with `count` elements of `kind`.
    pub fn allocate_array(
        &self,
        count: i64,
        kind: MemoryType,
        op_stack: &[usize],
        collect: bool,
    ) -> *mut usize {
        if count < 0 {
            eprintln!(">>> Invalid allocation size: {count} <<<");
            std::process::exit(1);
        }
        if kind == MemoryType::Object {
            eprintln!(">>> Invalid memory allocation <<<");
            std::process::exit(1);
        }
        let calc_size = count as usize * kind.element_size();

        if collect
            && self.allocation_size() + calc_size > self.mem_max_size.load(Ordering::Relaxed)
        {
            self.collect_all_memory(op_stack);
        }

        let mem = self.get_memory(calc_size + WORD * EXTRA_BUF_SIZE);
        // SAFETY: as in allocate_object.
        let user = unsafe {
            *mem = kind as usize;
            *mem.add(1) = calc_size;
            mem.add(EXTRA_BUF_SIZE)
        };

        let mut allocated = self.allocated.lock().unwrap();
        allocated.allocation_size += calc_size;
        allocated.set.insert(user as usize);
        drop(allocated);

        tracing::trace!(?kind, size = calc_size, "allocated array");
        user
    }

    /// Quantized chunk size: powers of two from 8 B through 4 MB, then one
    /// 16 MB bucket.
    pub fn get_alloc_size(size: usize) -> usize {
        let mut chunk = 8usize;
        while chunk < size && chunk < 4 * 1024 * 1024 {
            chunk <<= 1;
        }
        if chunk >= size {
            chunk
        } else {
            16 * 1024 * 1024
        }
    }

    /// Pop a zeroed chunk for `ask_size` bytes, refilling the size class
    /// from the OS when its stack is dry. The returned pointer is one word
    /// past the chunk base, which records the chunk size.
    fn get_memory(&self, ask_size: usize) -> *mut usize {
        let chunk_size = Self::get_alloc_size(ask_size + WORD);

        let base = {
            let mut store = self.free_store.lock().unwrap();
            let list = store.lists.entry(chunk_size).or_default();
            if list.is_empty() {
                // carve a fresh pool for this size class
                let layout = Self::chunk_layout(chunk_size);
                for _ in 0..MEM_POOL_LIST_MAX {
                    // SAFETY: layout is non-zero sized and word aligned.
                    let chunk = unsafe { alloc_zeroed(layout) };
                    if chunk.is_null() {
                        eprintln!(">>> Unable to allocate memory pool <<<");
                        std::process::exit(1);
                    }
                    list.push(chunk as usize);
                }
                tracing::debug!(chunk_size, "raw pool allocation");
            }
            let base = list.pop().expect("refilled above") as *mut usize;
            store.cache_size = store.cache_size.saturating_sub(chunk_size);
            base
        };

        // SAFETY: base points at chunk_size bytes owned by this manager;
        // recycled chunks are re-zeroed so callers always see cleared
        // payloads.
        unsafe {
            std::ptr::write_bytes(base as *mut u8, 0, chunk_size);
            *base = chunk_size;
            base.add(1)
        }
    }

    fn chunk_layout(chunk_size: usize) -> Layout {
        Layout::from_size_align(chunk_size, WORD).expect("valid chunk layout")
    }

    /// Return a swept chunk to its size class. `raw` is the chunk base
    /// (the chunk-size word). Flushes the whole cache back to the OS when
    /// it outgrows the collection watermark.
    fn add_free_memory(&self, raw: *mut usize) {
        let mut store = self.free_store.lock().unwrap();
        if store.cache_size > self.mem_max_size.load(Ordering::Relaxed) {
            Self::clear_free_store(&mut store);
        }

        // SAFETY: raw is a chunk base previously produced by get_memory.
        let chunk_size = unsafe { *raw };
        store.cache_size += chunk_size;
        store.lists.entry(chunk_size).or_default().push(raw as usize);
    }

    fn clear_free_store(store: &mut FreeStore) {
        for (&chunk_size, list) in store.lists.iter_mut() {
            let layout = Self::chunk_layout(chunk_size);
            for base in list.drain(..) {
                // SAFETY: every pooled chunk was produced by alloc_zeroed
                // with this exact layout.
                unsafe { dealloc(base as *mut u8, layout) };
            }
        }
        store.cache_size = 0;
    }

    // =========================================================================
    // Root registration
    // =========================================================================

    pub fn add_pda_method_root(&self, frame: *const StackFrame) {
        self.pda_frames.lock().unwrap().insert(FrameRoot(frame));
    }

    pub fn remove_pda_method_root(&self, frame: *const StackFrame) {
        self.pda_frames.lock().unwrap().remove(&FrameRoot(frame));
    }

    pub fn add_pda_monitor_root(&self, monitor: *const StackFrameMonitor) {
        self.pda_monitors.lock().unwrap().insert(MonitorRoot(monitor));
    }

    pub fn remove_pda_monitor_root(&self, monitor: *const StackFrameMonitor) {
        self.pda_monitors.lock().unwrap().remove(&MonitorRoot(monitor));
    }

    // =========================================================================
    // Marking
    // =========================================================================

    /// Set the mark bit; true only the first time, so traversal recurses
    /// into each object exactly once.
    ///
    /// # Safety
    /// `mem` must be null or a live user pointer from this manager.
    unsafe fn mark_memory(&self, mem: *mut usize) -> bool {
        if mem.is_null() {
            return false;
        }
        // SAFETY: per contract, the header words precede the user pointer.
        unsafe {
            if *mem.offset(MARKED_FLAG_OFFSET) != 0 {
                return false;
            }
            let _guard = (!self.serial).then(|| self.marked.lock().unwrap());
            *mem.offset(MARKED_FLAG_OFFSET) = 1;
        }
        true
    }

    /// Mark only when the pointer is a managed allocation; used where a
    /// slot may hold a stack temporary or other unidentified word.
    ///
    /// # Safety
    /// `mem` may be any word-aligned pointer value; it is only dereferenced
    /// after membership in the allocated set is confirmed.
    unsafe fn mark_valid_memory(&self, mem: *mut usize) -> bool {
        if mem.is_null() || !self.is_allocated(mem) {
            return false;
        }
        // SAFETY: membership confirmed above.
        unsafe { self.mark_memory(mem) }
    }

    /// Class id of a managed object, `None` for arrays and foreign words.
    fn object_class_id(&self, mem: *const usize) -> Option<usize> {
        if !self.is_allocated(mem) {
            return None;
        }
        // SAFETY: allocated user pointers carry the header prefix.
        unsafe {
            match MemoryType::from_word(*mem.offset(TYPE_OFFSET)) {
                Some(MemoryType::Object) => Some(*mem.offset(SIZE_OR_CLS_OFFSET)),
                _ => None,
            }
        }
    }

    /// Trace one object: mark it and walk its instance declarations.
    ///
    /// # Safety
    /// `mem` must be null, a managed pointer, or an arbitrary candidate
    /// word that is validated before use.
    unsafe fn check_object(&self, mem: *mut usize) {
        if mem.is_null() {
            return;
        }

        if let Some(cls_id) = self.object_class_id(mem) {
            if let Some(cls) = self.program.class(cls_id) {
                // SAFETY: mem is a managed object of cls.
                unsafe {
                    if self.mark_memory(mem) {
                        self.check_memory(mem, &cls.instance_dclrs);
                    }
                }
                return;
            }
        }

        // unidentified segment: a primitive array, an object array, or a
        // stack temp that merely looks like a pointer
        // SAFETY: mark_valid_memory validates membership before touching
        // the header.
        unsafe {
            if self.mark_valid_memory(mem) {
                let mem_type = MemoryType::from_word(*mem.offset(TYPE_OFFSET));
                if matches!(mem_type, Some(MemoryType::Object) | Some(MemoryType::IntArray)) {
                    self.check_array_elements(mem);
                }
            }
        }
    }

    /// Walk an object-array payload: `[count][dim][dim sizes...][elements]`.
    ///
    /// # Safety
    /// `mem` must be a marked, managed array allocation.
    unsafe fn check_array_elements(&self, mem: *mut usize) {
        // SAFETY: per contract.
        unsafe {
            let count = *mem;
            let dim = *mem.add(1);
            let elements = mem.add(2 + dim);
            for i in 0..count {
                self.check_object(*elements.add(i) as *mut usize);
            }
        }
    }

    /// Walk a declaration table over a memory region, marking everything
    /// reachable. Slot layout follows the declaration kinds.
    ///
    /// # Safety
    /// `mem` must point at a region laid out by `dclrs`.
    unsafe fn check_memory(&self, mem: *mut usize, dclrs: &[StackDclr]) {
        let mut mem = mem;
        for dclr in dclrs {
            // SAFETY: the declaration table bounds every slot read.
            unsafe {
                match dclr {
                    StackDclr::Func => {
                        // packed (virtual class id, method id), then the
                        // closure memory pointer
                        let packed = *mem;
                        let virtual_cls_id = (packed >> 16) & 0xFFFF;
                        let method_id = packed & 0xFFFF;
                        let closure_mem = *mem.add(1) as *mut usize;
                        if let Some(cls) = self.program.class(virtual_cls_id) {
                            if self.mark_memory(closure_mem) {
                                self.check_memory(closure_mem, cls.closure_dclrs(method_id));
                            }
                        }
                        mem = mem.add(2);
                    }
                    StackDclr::Int | StackDclr::Char | StackDclr::Float => {
                        mem = mem.add(1);
                    }
                    StackDclr::ByteArray
                    | StackDclr::CharArray
                    | StackDclr::IntArray
                    | StackDclr::FloatArray => {
                        self.mark_memory(*mem as *mut usize);
                        mem = mem.add(1);
                    }
                    StackDclr::Obj => {
                        self.check_object(*mem as *mut usize);
                        mem = mem.add(1);
                    }
                    StackDclr::ObjArray => {
                        let array = *mem as *mut usize;
                        if self.mark_valid_memory(array) {
                            self.check_array_elements(array);
                        }
                        mem = mem.add(1);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Root scanning
    // =========================================================================

    fn check_static(&self) {
        for cls in self.program.classes() {
            let class_mem = cls.class_mem.lock().unwrap();
            if !class_mem.is_empty() {
                // SAFETY: class memory is laid out by the class-declaration
                // table and stays alive for the program's lifetime.
                unsafe {
                    self.check_memory(class_mem.as_ptr() as *mut usize, &cls.class_dclrs);
                }
            }
        }
    }

    fn check_stack(&self, op_stack: &[usize]) {
        for pos in (0..op_stack.len()).rev() {
            let candidate = op_stack[pos] as *mut usize;
            if self.is_allocated(candidate) {
                // SAFETY: membership in the allocated set was confirmed.
                unsafe { self.check_object(candidate) };
            }
        }
    }

    /// Partition registered frames: JIT frames move into the shared JIT
    /// vector, interpreter frames are copied out for a local walk.
    fn gather_pda_frames(&self) -> Vec<*const StackFrame> {
        let mut frames: Vec<*const StackFrame> = Vec::new();

        {
            let pda_frames = self.pda_frames.lock().unwrap();
            for root in pda_frames.iter() {
                // SAFETY: registered roots outlive their registration.
                let frame = unsafe { &*root.0 };
                if frame.jit_mem.is_null() {
                    frames.push(root.0);
                } else {
                    self.jit_frames.lock().unwrap().push(*root);
                }
            }
        }

        {
            let monitors = self.pda_monitors.lock().unwrap();
            for root in monitors.iter() {
                // SAFETY: as above; a monitor describes a live call stack.
                unsafe {
                    let monitor = &*root.0;
                    let mut pos = *monitor.call_stack_pos;
                    if pos > 0 {
                        let cur = *monitor.cur_frame;
                        if (*cur).jit_mem.is_null() {
                            frames.push(cur);
                        } else {
                            self.jit_frames.lock().unwrap().push(FrameRoot(cur));
                        }
                        while pos > 0 {
                            pos -= 1;
                            let frame = *monitor.call_stack.offset(pos);
                            if (*frame).jit_mem.is_null() {
                                frames.push(frame);
                            } else {
                                self.jit_frames.lock().unwrap().push(FrameRoot(frame));
                            }
                        }
                    }
                }
            }
        }

        frames
    }

    fn scan_interpreter_frames(&self, frames: &[*const StackFrame]) {
        for &frame_ptr in frames {
            // SAFETY: registered roots outlive their registration.
            let frame = unsafe { &*frame_ptr };
            let Some(method) = self.program.method(frame.method) else {
                continue;
            };

            // SAFETY: frame memory is laid out as [self][and_or?][slots].
            unsafe {
                let mut mem = frame.mem;
                if !method.is_lambda {
                    self.check_object(*mem as *mut usize);
                }
                if method.has_and_or {
                    mem = mem.add(2);
                } else {
                    mem = mem.add(1);
                }
                self.check_memory(mem, &method.dclrs);
            }
        }
    }

    /// Scan JIT frames moved over by the PDA walk: self, the declaration
    /// slots in reverse declaration order, then six trailing temporaries
    /// that may hold object references during native calls.
    fn check_jit_roots(&self) {
        let mut jit_frames = self.jit_frames.lock().unwrap();
        for root in jit_frames.iter() {
            // SAFETY: registered roots outlive their registration.
            let frame = unsafe { &*root.0 };
            let Some(method) = self.program.method(frame.method) else {
                continue;
            };
            if frame.jit_mem.is_null() {
                continue;
            }

            // SAFETY: jit memory is laid out by the declaration table with
            // six temp words after the declared slots.
            unsafe {
                if !method.is_lambda {
                    self.check_object(*frame.mem as *mut usize);
                }

                let mut mem = frame.jit_mem;
                for dclr in method.dclrs.iter().rev() {
                    match dclr {
                        StackDclr::Func => {
                            let packed = *mem;
                            let virtual_cls_id = (packed >> 16) & 0xFFFF;
                            let method_id = packed & 0xFFFF;
                            let closure_mem = *mem.add(1) as *mut usize;
                            if let Some(cls) = self.program.class(virtual_cls_id) {
                                if self.mark_memory(closure_mem) {
                                    self.check_memory(closure_mem, cls.closure_dclrs(method_id));
                                }
                            }
                            mem = mem.add(2);
                        }
                        StackDclr::Int | StackDclr::Char | StackDclr::Float => {
                            mem = mem.add(1);
                        }
                        StackDclr::ByteArray
                        | StackDclr::CharArray
                        | StackDclr::IntArray
                        | StackDclr::FloatArray => {
                            self.mark_memory(*mem as *mut usize);
                            mem = mem.add(1);
                        }
                        StackDclr::Obj => {
                            self.check_object(*mem as *mut usize);
                            mem = mem.add(1);
                        }
                        StackDclr::ObjArray => {
                            let array = *mem as *mut usize;
                            if self.mark_valid_memory(array) {
                                self.check_array_elements(array);
                            }
                            mem = mem.add(1);
                        }
                    }
                }

                // temporaries stored during some native method calls
                for i in 0..6 {
                    let candidate = *mem.add(i) as *mut usize;
                    if self.is_allocated(candidate) {
                        self.check_object(candidate);
                    }
                }
            }
        }
        jit_frames.clear();
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run a full collection against the caller's operand stack. Only one
    /// collection runs at a time; a racing request returns without
    /// collecting.
    pub fn collect_all_memory(&self, op_stack: &[usize]) {
        if self.serial {
            self.collect(op_stack);
            return;
        }

        let Ok(guard) = self.marked_sweep.try_lock() else {
            return;
        };
        std::thread::scope(|scope| {
            scope.spawn(|| self.collect(op_stack));
        });
        drop(guard);
    }

    fn collect(&self, op_stack: &[usize]) {
        tracing::debug!(
            allocated = self.allocated_count(),
            bytes = self.allocation_size(),
            "collection start"
        );

        if self.serial {
            self.check_static();
            self.check_stack(op_stack);
            let frames = self.gather_pda_frames();
            self.check_jit_roots();
            self.scan_interpreter_frames(&frames);
        } else {
            std::thread::scope(|scope| {
                scope.spawn(|| self.check_static());
                scope.spawn(|| self.check_stack(op_stack));
                scope.spawn(move || {
                    let frames = self.gather_pda_frames();
                    scope.spawn(|| self.check_jit_roots());
                    self.scan_interpreter_frames(&frames);
                });
            });
        }

        self.sweep();
    }

    /// Keep marked objects (clearing their bits), recycle everything else,
    /// and swap the survivor set in. Adjusts the collection watermark
    /// against observed reclamation yield.
    fn sweep(&self) {
        let mut allocated = self.allocated.lock().unwrap();
        let _marked = (!self.serial).then(|| self.marked.lock().unwrap());

        let before = allocated.set.len();
        let mut live = FxHashSet::default();
        let mut reclaimed_bytes = 0usize;

        for &addr in allocated.set.iter() {
            let mem = addr as *mut usize;
            // SAFETY: every member of the allocated set is a managed user
            // pointer with a live header.
            unsafe {
                if *mem.offset(MARKED_FLAG_OFFSET) != 0 {
                    *mem.offset(MARKED_FLAG_OFFSET) = 0;
                    live.insert(addr);
                } else {
                    let mem_size = match MemoryType::from_word(*mem.offset(TYPE_OFFSET)) {
                        Some(MemoryType::Object) => {
                            let cls_id = *mem.offset(SIZE_OR_CLS_OFFSET);
                            self.program
                                .class(cls_id)
                                .map(|c| c.instance_size)
                                .unwrap_or(0)
                        }
                        _ => *mem.offset(SIZE_OR_CLS_OFFSET),
                    };
                    reclaimed_bytes += mem_size;

                    let chunk_base = mem.offset(-(EXTRA_BUF_SIZE as isize)).offset(-1);
                    self.add_free_memory(chunk_base);
                }
            }
        }

        allocated.allocation_size -= reclaimed_bytes;

        // adaptive watermark
        if live.len() >= before.saturating_sub(1) {
            if self.uncollected_count.load(Ordering::Relaxed) < UNCOLLECTED_COUNT {
                self.uncollected_count.fetch_add(1, Ordering::Relaxed);
            } else {
                let grown = self.mem_max_size.load(Ordering::Relaxed) << 3;
                self.mem_max_size.store(grown, Ordering::Relaxed);
                self.uncollected_count.store(0, Ordering::Relaxed);
            }
        } else if self.mem_max_size.load(Ordering::Relaxed) != MEM_MAX {
            if self.collected_count.load(Ordering::Relaxed) < COLLECTED_COUNT {
                self.collected_count.fetch_add(1, Ordering::Relaxed);
            } else {
                let shrunk = (self.mem_max_size.load(Ordering::Relaxed) >> 1) / 2;
                self.mem_max_size.store(
                    if shrunk == 0 { MEM_MAX << 3 } else { shrunk },
                    Ordering::Relaxed,
                );
                self.collected_count.store(0, Ordering::Relaxed);
            }
        }

        tracing::debug!(
            survivors = live.len(),
            reclaimed = reclaimed_bytes,
            "collection end"
        );
        allocated.set = live;
    }

    // =========================================================================
    // Runtime cast check
    // =========================================================================

    /// Return the pointer when `to_id` is on the object's class ancestor
    /// chain or any ancestor's interface list; interface lists terminate
    /// with [`INF_ENDING`].
    pub fn valid_object_cast(
        &self,
        mem: *mut usize,
        to_id: i64,
        cls_hierarchy: &[i64],
        cls_interfaces: &[Vec<i64>],
    ) -> Option<*mut usize> {
        let id = self.object_class_id(mem)? as i64;

        // ancestor chain
        let mut virtual_cls_id = id;
        while virtual_cls_id != -1 {
            if virtual_cls_id == to_id {
                return Some(mem);
            }
            virtual_cls_id = cls_hierarchy[virtual_cls_id as usize];
        }

        // ancestor interfaces
        let mut virtual_cls_id = id;
        while virtual_cls_id != -1 {
            let interfaces = &cls_interfaces[virtual_cls_id as usize];
            for &inf_id in interfaces {
                if inf_id <= INF_ENDING {
                    break;
                }
                if inf_id == to_id {
                    return Some(mem);
                }
            }
            virtual_cls_id = cls_hierarchy[virtual_cls_id as usize];
        }

        None
    }

    // =========================================================================
    // Virtual dispatch cache
    // =========================================================================

    /// Memoized `(concrete class, virtual class id, virtual method id)`
    /// resolution.
    pub fn get_virtual_entry(
        &self,
        concrete_cls: usize,
        virtual_cls_id: usize,
        virtual_mthd_id: usize,
    ) -> Option<MethodRef> {
        self.virtual_methods
            .read()
            .unwrap()
            .get(&(concrete_cls, virtual_cls_id, virtual_mthd_id))
            .copied()
    }

    pub fn add_virtual_entry(
        &self,
        concrete_cls: usize,
        virtual_cls_id: usize,
        virtual_mthd_id: usize,
        method: MethodRef,
    ) {
        self.virtual_methods
            .write()
            .unwrap()
            .insert((concrete_cls, virtual_cls_id, virtual_mthd_id), method);
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        // free pooled chunks
        let mut store = self.free_store.lock().unwrap();
        Self::clear_free_store(&mut store);

        // free still-live allocations
        let allocated = self.allocated.lock().unwrap();
        for &addr in allocated.set.iter() {
            let mem = addr as *mut usize;
            // SAFETY: every member is a user pointer into a chunk whose
            // base records its size.
            unsafe {
                let base = mem.offset(-(EXTRA_BUF_SIZE as isize)).offset(-1);
                let chunk_size = *base;
                dealloc(base as *mut u8, Self::chunk_layout(chunk_size));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A class whose payload holds only plain words.
    fn flat_program(instance_words: usize) -> Arc<StackProgram> {
        let mut program = StackProgram::new();
        program.add_class(
            "Flat",
            instance_words * WORD,
            vec![StackDclr::Int; instance_words],
            vec![],
        );
        Arc::new(program)
    }

    /// `Node { next: Obj, value: Int }` for graph tracing.
    fn node_program() -> Arc<StackProgram> {
        let mut program = StackProgram::new();
        program.add_class(
            "Node",
            2 * WORD,
            vec![StackDclr::Obj, StackDclr::Int],
            vec![],
        );
        Arc::new(program)
    }

    #[test]
    fn alloc_sizes_quantize_to_powers_of_two() {
        assert_eq!(MemoryManager::get_alloc_size(1), 8);
        assert_eq!(MemoryManager::get_alloc_size(8), 8);
        assert_eq!(MemoryManager::get_alloc_size(9), 16);
        assert_eq!(MemoryManager::get_alloc_size(100), 128);
        assert_eq!(MemoryManager::get_alloc_size(4096), 4096);
        assert_eq!(MemoryManager::get_alloc_size(4 * 1024 * 1024), 4 * 1024 * 1024);
        assert_eq!(
            MemoryManager::get_alloc_size(4 * 1024 * 1024 + 1),
            16 * 1024 * 1024
        );
    }

    #[test]
    fn allocations_are_zero_filled_and_distinct() {
        let manager = MemoryManager::new_serial(flat_program(4));
        let a = manager.allocate_object(0, &[], false);
        let b = manager.allocate_object(0, &[], false);
        assert_ne!(a, b);
        // SAFETY: payloads are 4 words.
        unsafe {
            for i in 0..4 {
                assert_eq!(*a.add(i), 0);
                assert_eq!(*b.add(i), 0);
            }
        }
        assert_eq!(manager.allocation_size(), 2 * 4 * WORD);
    }

    #[test]
    fn arrays_record_their_payload_byte_count() {
        let manager = MemoryManager::new_serial(flat_program(1));
        let a = manager.allocate_array(10, MemoryType::IntArray, &[], false);
        assert!(manager.is_allocated(a));
        assert_eq!(manager.allocation_size(), 10 * WORD);
    }

    #[test]
    fn collection_keeps_stack_rooted_objects() {
        // S6: ten objects, four retained on the operand stack
        let manager = MemoryManager::new_serial(flat_program(4));
        let payload = 4 * WORD;

        let objects: Vec<*mut usize> = (0..10)
            .map(|_| manager.allocate_object(0, &[], false))
            .collect();
        assert_eq!(manager.allocation_size(), 10 * payload);

        let op_stack: Vec<usize> = objects[..4].iter().map(|&p| p as usize).collect();
        manager.collect_all_memory(&op_stack);

        assert_eq!(manager.allocated_count(), 4);
        assert_eq!(manager.allocation_size(), 4 * payload);
        for &kept in &objects[..4] {
            assert!(manager.is_allocated(kept));
            // SAFETY: survivors stay dereferenceable.
            unsafe {
                *kept = 7;
                assert_eq!(*kept, 7);
            }
        }
        for &gone in &objects[4..] {
            assert!(!manager.is_allocated(gone));
        }
    }

    #[test]
    fn threaded_collection_matches_serial_behavior() {
        let manager = MemoryManager::new(flat_program(2));
        let keep = manager.allocate_object(0, &[], false);
        let _drop = manager.allocate_object(0, &[], false);

        let op_stack = vec![keep as usize];
        manager.collect_all_memory(&op_stack);

        assert_eq!(manager.allocated_count(), 1);
        assert!(manager.is_allocated(keep));
    }

    #[test]
    fn mark_bits_are_clear_after_collection() {
        let manager = MemoryManager::new_serial(flat_program(1));
        let kept = manager.allocate_object(0, &[], false);
        let op_stack = vec![kept as usize];

        manager.collect_all_memory(&op_stack);
        // SAFETY: kept survived; its header precedes the user pointer.
        unsafe {
            assert_eq!(*kept.offset(MARKED_FLAG_OFFSET), 0);
        }

        // a second cycle still sees it as live, not stale-marked
        manager.collect_all_memory(&op_stack);
        assert!(manager.is_allocated(kept));
    }

    #[test]
    fn tracing_follows_object_declarations() {
        let manager = MemoryManager::new_serial(node_program());
        let head = manager.allocate_object(0, &[], false);
        let tail = manager.allocate_object(0, &[], false);
        let loose = manager.allocate_object(0, &[], false);
        // SAFETY: Node's first slot is its Obj declaration.
        unsafe {
            *head = tail as usize;
        }

        let op_stack = vec![head as usize];
        manager.collect_all_memory(&op_stack);

        assert!(manager.is_allocated(head));
        assert!(manager.is_allocated(tail));
        assert!(!manager.is_allocated(loose));
        assert_eq!(manager.allocated_count(), 2);
    }

    #[test]
    fn cyclic_graphs_terminate_and_survive() {
        let manager = MemoryManager::new_serial(node_program());
        let a = manager.allocate_object(0, &[], false);
        let b = manager.allocate_object(0, &[], false);
        // SAFETY: a <-> b cycle through the Obj slots.
        unsafe {
            *a = b as usize;
            *b = a as usize;
        }

        let op_stack = vec![a as usize];
        manager.collect_all_memory(&op_stack);
        assert_eq!(manager.allocated_count(), 2);
    }

    #[test]
    fn pda_frames_root_their_declarations() {
        let mut program = StackProgram::new();
        let cls = program.add_class("Holder", WORD, vec![StackDclr::Int], vec![]);
        let method = program.add_method(cls, "Run", false, false, vec![StackDclr::Obj]);
        let manager = MemoryManager::new_serial(Arc::new(program));

        let object = manager.allocate_object(0, &[], false);
        // frame: [self][obj slot]
        let frame_mem = vec![0usize, object as usize];
        let frame = StackFrame {
            method,
            mem: frame_mem.as_ptr() as *mut usize,
            jit_mem: std::ptr::null_mut(),
        };
        manager.add_pda_method_root(&frame);

        manager.collect_all_memory(&[]);
        assert!(manager.is_allocated(object));

        manager.remove_pda_method_root(&frame);
        manager.collect_all_memory(&[]);
        assert!(!manager.is_allocated(object));
    }

    #[test]
    fn monitors_walk_the_whole_call_stack() {
        let mut program = StackProgram::new();
        let cls = program.add_class("Holder", WORD, vec![StackDclr::Int], vec![]);
        let method = program.add_method(cls, "Run", false, false, vec![StackDclr::Obj]);
        let manager = MemoryManager::new_serial(Arc::new(program));

        let deep = manager.allocate_object(0, &[], false);
        let current = manager.allocate_object(0, &[], false);

        let deep_mem = vec![0usize, deep as usize];
        let deep_frame = StackFrame {
            method,
            mem: deep_mem.as_ptr() as *mut usize,
            jit_mem: std::ptr::null_mut(),
        };
        let cur_mem = vec![0usize, current as usize];
        let cur_frame = StackFrame {
            method,
            mem: cur_mem.as_ptr() as *mut usize,
            jit_mem: std::ptr::null_mut(),
        };

        let call_stack: Vec<*const StackFrame> = vec![&deep_frame];
        let call_stack_pos: isize = 1;
        let cur_frame_ptr: *const StackFrame = &cur_frame;
        let monitor = StackFrameMonitor {
            call_stack: call_stack.as_ptr(),
            call_stack_pos: &call_stack_pos,
            cur_frame: &cur_frame_ptr,
        };
        manager.add_pda_monitor_root(&monitor);

        manager.collect_all_memory(&[]);
        assert!(manager.is_allocated(deep));
        assert!(manager.is_allocated(current));

        manager.remove_pda_monitor_root(&monitor);
    }

    #[test]
    fn lambda_closures_trace_through_func_slots() {
        let mut program = StackProgram::new();
        let cls = program.add_class("App", WORD, vec![StackDclr::Int], vec![]);
        let method = program.add_method(cls, "Run", false, false, vec![StackDclr::Func]);
        // closure for method id 4 captures one object
        program.add_closure(cls, 4, vec![StackDclr::Obj]);
        let manager = MemoryManager::new_serial(Arc::new(program));

        let captured = manager.allocate_object(0, &[], false);
        let closure = manager.allocate_object(0, &[], false);
        // SAFETY: the closure's single slot holds the captured object.
        unsafe {
            *closure = captured as usize;
        }

        // frame: [self][packed (cls id 0, method id 4)][closure ptr]
        let packed = (cls << 16) | 4;
        let frame_mem = vec![0usize, packed, closure as usize];
        let frame = StackFrame {
            method,
            mem: frame_mem.as_ptr() as *mut usize,
            jit_mem: std::ptr::null_mut(),
        };
        manager.add_pda_method_root(&frame);

        manager.collect_all_memory(&[]);
        assert!(manager.is_allocated(closure));
        assert!(manager.is_allocated(captured));

        manager.remove_pda_method_root(&frame);
    }

    #[test]
    fn object_arrays_trace_each_element() {
        let manager = MemoryManager::new_serial(node_program());
        let element = manager.allocate_object(0, &[], false);

        // object array payload: [count][dim][dim0][elements...]
        let array = manager.allocate_array(4, MemoryType::IntArray, &[], false);
        // SAFETY: the array has four words of payload.
        unsafe {
            *array = 1; // element count
            *array.add(1) = 1; // rank
            *array.add(2) = 1; // dimension size
            *array.add(3) = element as usize;
        }

        let op_stack = vec![array as usize];
        manager.collect_all_memory(&op_stack);
        assert!(manager.is_allocated(array));
        assert!(manager.is_allocated(element));
    }

    #[test]
    fn recycled_chunks_come_back_zeroed() {
        let manager = MemoryManager::new_serial(flat_program(4));
        let first = manager.allocate_object(0, &[], false);
        // SAFETY: dirty the payload before dropping the object.
        unsafe {
            for i in 0..4 {
                *first.add(i) = 0xDEAD;
            }
        }
        manager.collect_all_memory(&[]);
        assert_eq!(manager.allocated_count(), 0);

        let second = manager.allocate_object(0, &[], false);
        // SAFETY: fresh allocation of the same size class.
        unsafe {
            for i in 0..4 {
                assert_eq!(*second.add(i), 0, "recycled chunk must be zeroed");
            }
        }
    }

    #[test]
    fn oversized_free_cache_flushes_to_the_os() {
        let manager = MemoryManager::new_serial(flat_program(1024));
        let payload = 1024 * WORD; // 8 KiB objects

        // fill and drop enough objects that the recycled-chunk cache
        // outgrows the watermark mid-sweep
        let rounds = MEM_MAX / payload + 16;
        for _ in 0..rounds {
            let _ = manager.allocate_object(0, &[], false);
        }
        manager.collect_all_memory(&[]);
        assert_eq!(manager.allocated_count(), 0);

        // allocation still works after the flush
        let fresh = manager.allocate_object(0, &[], false);
        // SAFETY: freshly allocated payload.
        unsafe {
            assert_eq!(*fresh, 0);
        }
        assert!(manager.is_allocated(fresh));
    }

    #[test]
    fn fruitless_cycles_grow_the_watermark() {
        let manager = MemoryManager::new_serial(flat_program(1));
        let kept = manager.allocate_object(0, &[], false);
        let op_stack = vec![kept as usize];

        assert_eq!(manager.mem_max_size(), MEM_MAX);
        for _ in 0..=UNCOLLECTED_COUNT {
            manager.collect_all_memory(&op_stack);
        }
        assert_eq!(manager.mem_max_size(), MEM_MAX << 3);
    }

    #[test]
    fn concurrent_allocations_return_distinct_pointers() {
        let manager = Arc::new(MemoryManager::new(flat_program(2)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(std::thread::spawn(move || {
                (0..200)
                    .map(|_| manager.allocate_object(0, &[], false) as usize)
                    .collect::<Vec<usize>>()
            }));
        }

        let mut all: Vec<usize> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: FxHashSet<usize> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn valid_object_cast_walks_ancestors_and_interfaces() {
        let mut program = StackProgram::new();
        program.add_class("Base", WORD, vec![StackDclr::Int], vec![]);
        program.add_class("Mid", WORD, vec![StackDclr::Int], vec![]);
        program.add_class("Leaf", WORD, vec![StackDclr::Int], vec![]);
        let manager = MemoryManager::new_serial(Arc::new(program));

        let leaf = manager.allocate_object(2, &[], false);
        let hierarchy = vec![-1i64, 0, 1];
        let interfaces = vec![
            vec![INF_ENDING],
            vec![5, INF_ENDING],
            vec![INF_ENDING],
        ];

        // ancestors
        assert!(manager
            .valid_object_cast(leaf, 2, &hierarchy, &interfaces)
            .is_some());
        assert!(manager
            .valid_object_cast(leaf, 1, &hierarchy, &interfaces)
            .is_some());
        assert!(manager
            .valid_object_cast(leaf, 0, &hierarchy, &interfaces)
            .is_some());
        // interface on an ancestor
        assert!(manager
            .valid_object_cast(leaf, 5, &hierarchy, &interfaces)
            .is_some());
        // unrelated
        assert!(manager
            .valid_object_cast(leaf, 7, &hierarchy, &interfaces)
            .is_none());
    }

    #[test]
    fn dispatch_cache_memoizes_resolutions() {
        let mut program = StackProgram::new();
        let cls = program.add_class("Impl", WORD, vec![StackDclr::Int], vec![]);
        let resolved = program.add_method(cls, "Next", false, false, vec![]);
        let manager = MemoryManager::new_serial(Arc::new(program));

        assert_eq!(manager.get_virtual_entry(0, 3, 9), None);
        manager.add_virtual_entry(0, 3, 9, resolved);
        assert_eq!(manager.get_virtual_entry(0, 3, 9), Some(resolved));
        // distinct key
        assert_eq!(manager.get_virtual_entry(1, 3, 9), None);
    }

    #[test]
    fn racing_collections_do_not_deadlock() {
        let manager = Arc::new(MemoryManager::new(flat_program(1)));
        let kept = manager.allocate_object(0, &[], false) as usize;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(std::thread::spawn(move || {
                let op_stack = vec![kept];
                for _ in 0..10 {
                    manager.collect_all_memory(&op_stack);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(manager.is_allocated(kept as *const usize));
    }
}
