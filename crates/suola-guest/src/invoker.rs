//! The in-process signature transport.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GuestConfig;
use crate::engine::{GuestEngine, IntoShared, SharedEngine};
use crate::error::{BoundaryError, GuestError, GuestResult, ModuleError};
use crate::guest::WasmtimeGuest;
use crate::locate::locate_module;
use crate::memory::{GuestExports, GuestMemoryPool};
use crate::module::{ModuleLoader, ValidatedModule};
use crate::wasi::RuleSource;

/// Largest URL, in bytes, accepted for signing.
pub const MAX_URL_LENGTH: usize = 64 * 1024;

/// Unique identifier for an invoker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvokerId(Uuid);

impl InvokerId {
    /// Create a new random invoker ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvokerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvokerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes URL signatures by calling into a guest module.
///
/// The guest instance and its allocator state are shared mutable state, so
/// every call holds one exclusive lock across the whole
/// allocate, write, compute, read, and release sequence.
///
/// # Example
///
/// ```no_run
/// use suola_guest::{GuestConfig, GuestInvoker};
///
/// let invoker = GuestInvoker::new(GuestConfig::default())?;
/// let signature = invoker.signature("https://example.com/test-article")?;
/// assert_eq!(signature.len(), 64);
/// # Ok::<(), suola_guest::GuestError>(())
/// ```
pub struct GuestInvoker<G = WasmtimeGuest> {
    id: InvokerId,
    guest: Mutex<G>,
    module_path: Option<PathBuf>,
}

impl GuestInvoker<WasmtimeGuest> {
    /// Locate, load, and instantiate the guest module.
    ///
    /// # Errors
    ///
    /// Fails if the module or rule source cannot be found, the module does
    /// not satisfy the call contract, or instantiation fails. No partially
    /// initialised invoker is ever returned.
    pub fn new(config: GuestConfig) -> GuestResult<Self> {
        let engine = GuestEngine::new(&config)?.into_shared();
        Self::with_engine(engine, config)
    }

    /// Like [`GuestInvoker::new`], reusing an existing engine.
    pub fn with_engine(engine: SharedEngine, config: GuestConfig) -> GuestResult<Self> {
        let path = match &config.module_path {
            Some(explicit) if explicit.is_file() => explicit.clone(),
            Some(explicit) => {
                return Err(ModuleError::NotFound {
                    probed: vec![explicit.clone()],
                }
                .into());
            }
            None => locate_module()?,
        };

        let module = ModuleLoader::new(engine.clone()).load_file(&path)?;
        let mut invoker = Self::with_module(&engine, &module, &config)?;
        invoker.module_path = Some(path);
        Ok(invoker)
    }

    /// Instantiate an already loaded module.
    pub fn with_module(
        engine: &SharedEngine,
        module: &ValidatedModule,
        config: &GuestConfig,
    ) -> GuestResult<Self> {
        let rule_source = config
            .rule_source
            .as_deref()
            .map(RuleSource::resolve)
            .transpose()?;

        let guest = WasmtimeGuest::instantiate(engine, module, config, rule_source.as_ref())?;
        Ok(Self::from_guest(guest))
    }
}

impl<G: GuestExports> GuestInvoker<G> {
    /// Wrap an existing guest.
    pub fn from_guest(guest: G) -> Self {
        let id = InvokerId::new();
        info!(invoker_id = %id, "Created guest invoker");
        Self {
            id,
            guest: Mutex::new(guest),
            module_path: None,
        }
    }

    /// Get the invoker ID.
    pub fn id(&self) -> InvokerId {
        self.id
    }

    /// The module file this invoker was loaded from, if any.
    pub fn module_path(&self) -> Option<&Path> {
        self.module_path.as_deref()
    }

    /// Compute the signature of `url`.
    ///
    /// Input limits are enforced before the guest is touched.
    ///
    /// # Errors
    ///
    /// - [`GuestError::EmptyInput`] / [`GuestError::InputTooLarge`] for bad
    ///   input.
    /// - [`GuestError::GuestReported`] when the guest declines, e.g. no rule
    ///   matches.
    /// - [`GuestError::Boundary`] for any allocation, bounds, or trap fault.
    pub fn signature(&self, url: &str) -> GuestResult<String> {
        if url.is_empty() {
            return Err(GuestError::EmptyInput);
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(GuestError::InputTooLarge {
                len: url.len(),
                max: MAX_URL_LENGTH,
            });
        }

        let mut guest = self.guest.lock();
        let mut pool = GuestMemoryPool::new(&mut *guest);

        let (is_error, text) = pool.with_allocation(url.as_bytes(), |pool, offset, len| {
            let result = pool.compute(offset, len)?;
            let payload = pool.read_result(&result)?;
            let text =
                String::from_utf8(payload).map_err(|e| BoundaryError::InvalidUtf8(e.to_string()))?;
            Ok((result.is_error(), text))
        })?;

        if is_error {
            debug!(invoker_id = %self.id, url, reason = %text, "Guest reported no signature");
            return Err(GuestError::GuestReported(text));
        }
        if text.is_empty() {
            warn!(invoker_id = %self.id, url, "Guest returned an empty signature");
        }

        debug!(invoker_id = %self.id, url, signature = %text, "Computed signature");
        Ok(text)
    }
}

impl<G> std::fmt::Debug for GuestInvoker<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInvoker")
            .field("id", &self.id)
            .field("module_path", &self.module_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::PackedResult;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::{self, ThreadId};

    /// Echoes the input back, or flags it as an error when it starts with
    /// `miss:`.
    struct EchoGuest {
        memory: Vec<u8>,
        next: u32,
        calls: Arc<AtomicUsize>,
    }

    impl EchoGuest {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                memory: vec![0; 1 << 20],
                next: 64,
                calls,
            }
        }
    }

    impl GuestExports for EchoGuest {
        fn allocate(&mut self, size: u32) -> wasmtime::Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let offset = self.next;
            self.next += size;
            Ok(offset)
        }

        fn release(&mut self, _offset: u32) -> wasmtime::Result<()> {
            Ok(())
        }

        fn compute_signature(&mut self, offset: u32, len: u32) -> wasmtime::Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let input = &self.memory[offset as usize..(offset + len) as usize];
            let packed = if input.starts_with(b"miss:") {
                PackedResult::Err { offset, len }
            } else {
                PackedResult::Ok { offset, len }
            };
            Ok(packed.encode())
        }

        fn memory(&self) -> &[u8] {
            &self.memory
        }

        fn memory_mut(&mut self) -> &mut [u8] {
            &mut self.memory
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Allocate,
        Compute,
        Release,
    }

    type CallLog = Arc<parking_lot::Mutex<Vec<(ThreadId, Op)>>>;

    /// Records which thread made each boundary call.
    struct RecordingGuest {
        inner: EchoGuest,
        log: CallLog,
    }

    impl RecordingGuest {
        fn record(&self, op: Op) {
            self.log.lock().push((thread::current().id(), op));
            thread::yield_now();
        }
    }

    impl GuestExports for RecordingGuest {
        fn allocate(&mut self, size: u32) -> wasmtime::Result<u32> {
            self.record(Op::Allocate);
            self.inner.allocate(size)
        }

        fn release(&mut self, offset: u32) -> wasmtime::Result<()> {
            self.record(Op::Release);
            self.inner.release(offset)
        }

        fn compute_signature(&mut self, offset: u32, len: u32) -> wasmtime::Result<u64> {
            self.record(Op::Compute);
            self.inner.compute_signature(offset, len)
        }

        fn memory(&self) -> &[u8] {
            self.inner.memory()
        }

        fn memory_mut(&mut self) -> &mut [u8] {
            self.inner.memory_mut()
        }
    }

    #[test]
    fn test_concurrent_calls_do_not_interleave() {
        let log = CallLog::default();
        let invoker = Arc::new(GuestInvoker::from_guest(RecordingGuest {
            inner: EchoGuest::new(Arc::default()),
            log: Arc::clone(&log),
        }));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let invoker = Arc::clone(&invoker);
                thread::spawn(move || {
                    for call in 0..20 {
                        let url = format!("https://example.com/{worker}/{call}");
                        assert_eq!(invoker.signature(&url).unwrap(), url);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let log = log.lock();
        assert_eq!(log.len(), 8 * 20 * 3);
        for call in log.chunks(3) {
            let ops: Vec<Op> = call.iter().map(|(_, op)| *op).collect();
            assert_eq!(ops, [Op::Allocate, Op::Compute, Op::Release]);
            assert!(call.iter().all(|(id, _)| *id == call[0].0));
        }
    }

    #[test]
    fn test_signature_echo() {
        let invoker = GuestInvoker::from_guest(EchoGuest::new(Arc::default()));
        assert_eq!(invoker.signature("abc").unwrap(), "abc");
    }

    #[test]
    fn test_guest_reported_error() {
        let invoker = GuestInvoker::from_guest(EchoGuest::new(Arc::default()));
        let err = invoker.signature("miss:no rule").unwrap_err();
        assert!(matches!(err, GuestError::GuestReported(ref msg) if msg == "miss:no rule"));
        assert_eq!(invoker.signature("again").unwrap(), "again");
    }

    #[test]
    fn test_empty_input_never_reaches_guest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = GuestInvoker::from_guest(EchoGuest::new(calls.clone()));
        assert!(matches!(invoker.signature(""), Err(GuestError::EmptyInput)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_oversized_input_never_reaches_guest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = GuestInvoker::from_guest(EchoGuest::new(calls.clone()));
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));

        let err = invoker.signature(&url).unwrap_err();
        assert!(matches!(err, GuestError::InputTooLarge { max: MAX_URL_LENGTH, .. }));
        assert!(err.is_input());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_input_at_limit_is_accepted() {
        let invoker = GuestInvoker::from_guest(EchoGuest::new(Arc::default()));
        let url = "a".repeat(MAX_URL_LENGTH);
        assert_eq!(invoker.signature(&url).unwrap().len(), MAX_URL_LENGTH);
    }

    #[test]
    fn test_invoker_ids_are_unique() {
        let a = GuestInvoker::from_guest(EchoGuest::new(Arc::default()));
        let b = GuestInvoker::from_guest(EchoGuest::new(Arc::default()));
        assert_ne!(a.id(), b.id());
        assert!(a.module_path().is_none());
    }

    #[test]
    fn test_explicit_module_path_missing() {
        let config = GuestConfig::default().with_module_path("/nonexistent/suola.wasm");
        match GuestInvoker::new(config) {
            Err(GuestError::Module(ModuleError::NotFound { probed })) => {
                assert_eq!(probed, vec![PathBuf::from("/nonexistent/suola.wasm")]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
