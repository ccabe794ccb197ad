//! Coroutine stack memory
//!
//! A [`Stack`] owns one region and releases it on drop. Sizes are
//! normalized (0 means the configured default, then clamped to
//! `[MIN_STACK_SIZE, MAX_STACK_SIZE]` and rounded up to whole pages).
//! Platform-specific implementations handle virtual memory allocation.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as os;
    } else {
        compile_error!("costack stacks need a unix mmap implementation");
    }
}

use crate::config::{AllocFailurePolicy, StackAllocator};
use costack_core::constants::{FALLBACK_PAGE_SIZE, MAX_STACK_SIZE, MIN_STACK_SIZE, STACK_ALIGN};
use costack_core::{kerror, EngineError, EngineResult, ErrorKind};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// OS page size, queried once
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| os::query_page_size().unwrap_or(FALLBACK_PAGE_SIZE))
}

/// Round `size` up to a multiple of `page`
#[inline]
fn round_up(size: usize, page: usize) -> usize {
    size.div_ceil(page) * page
}

/// Resolve a requested stack size to the size actually mapped
pub fn normalize_size(requested: usize, default: usize) -> usize {
    let size = if requested == 0 { default } else { requested };
    round_up(size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE), page_size())
}

enum Backing {
    /// Whole mapping including the guard page, if any
    Mapped { total: usize, guard: usize },
    Heap { layout: Layout },
}

/// One coroutine stack; grows down from [`Stack::top`]
pub struct Stack {
    base: NonNull<u8>,
    usable: usize,
    backing: Backing,
}

impl Stack {
    /// Allocate a stack of `requested` bytes (0 = `default`) and apply
    /// the failure policy.
    pub fn allocate(
        requested: usize,
        default: usize,
        allocator: StackAllocator,
        guard_page: bool,
        policy: AllocFailurePolicy,
    ) -> EngineResult<Stack> {
        let size = normalize_size(requested, default);
        Self::allocate_exact(size, allocator, guard_page, policy)
    }

    /// [`Stack::allocate`] for a size that is already normalized
    pub(crate) fn allocate_exact(
        size: usize,
        allocator: StackAllocator,
        guard_page: bool,
        policy: AllocFailurePolicy,
    ) -> EngineResult<Stack> {
        let result = match allocator {
            StackAllocator::Mmap => Self::map(size, guard_page),
            StackAllocator::Heap => Self::heap(size),
        };
        match (result, policy) {
            (Ok(stack), _) => Ok(stack),
            (Err(e), AllocFailurePolicy::Error) => Err(e),
            (Err(e), AllocFailurePolicy::Abort) => {
                kerror!("coroutine stack allocation failed: {}", e);
                std::process::abort()
            }
        }
    }

    /// Map exactly `usable` bytes (page multiple) with an optional guard
    /// page below them
    pub fn map(usable: usize, guard_page: bool) -> EngineResult<Stack> {
        let guard = if guard_page { page_size() } else { 0 };
        let total = usable.checked_add(guard).ok_or_else(|| {
            EngineError::new(ErrorKind::OutOfMemory, "stack size overflows address space")
        })?;
        let base = os::map_stack(total, guard)?;
        Ok(Stack {
            // usable memory starts above the guard
            base: unsafe { NonNull::new_unchecked(base.as_ptr().add(guard)) },
            usable,
            backing: Backing::Mapped { total, guard },
        })
    }

    /// Heap-allocate exactly `usable` bytes, no guard page
    pub fn heap(usable: usize) -> EngineResult<Stack> {
        let layout = Layout::from_size_align(usable, STACK_ALIGN).map_err(|_| {
            EngineError::new(ErrorKind::InvalidValue, format!("bad stack size {}", usable))
        })?;
        if layout.size() == 0 {
            return Err(EngineError::new(ErrorKind::InvalidValue, "zero-sized stack"));
        }
        let ptr = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or_else(|| {
            EngineError::new(
                ErrorKind::OutOfMemory,
                format!("heap stack of {} bytes", usable),
            )
        })?;
        Ok(Stack {
            base,
            usable,
            backing: Backing::Heap { layout },
        })
    }

    /// Lowest usable address
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// One past the highest usable address
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.usable) }
    }

    /// Usable bytes (guard page excluded)
    #[inline]
    pub fn size(&self) -> usize {
        self.usable
    }

    #[inline]
    pub fn has_guard(&self) -> bool {
        matches!(self.backing, Backing::Mapped { guard, .. } if guard > 0)
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mapped { total, guard } => {
                let start = unsafe { self.base.as_ptr().sub(guard) };
                os::unmap_stack(start, total);
            }
            Backing::Heap { layout } => unsafe { std::alloc::dealloc(self.base.as_ptr(), layout) },
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("size", &self.usable)
            .field("mapped", &self.is_mapped())
            .field("guard", &self.has_guard())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let page = page_size();
        assert_eq!(normalize_size(0, 64 * 1024), round_up(64 * 1024, page));
        assert_eq!(normalize_size(1, 64 * 1024), round_up(MIN_STACK_SIZE, page));
        assert_eq!(normalize_size(usize::MAX, 64 * 1024), round_up(MAX_STACK_SIZE, page));
        assert_eq!(normalize_size(MIN_STACK_SIZE + 1, 0) % page, 0);
    }

    #[test]
    fn test_mapped_stack_is_writable() {
        let stack = Stack::map(normalize_size(0, 64 * 1024), true).unwrap();
        assert!(stack.has_guard());
        assert_eq!(stack.top() as usize % STACK_ALIGN, 0);
        unsafe {
            stack.bottom().write(0xAA);
            stack.top().sub(1).write(0x55);
            assert_eq!(stack.bottom().read(), 0xAA);
        }
    }

    #[test]
    fn test_heap_stack() {
        let stack = Stack::heap(32 * 1024).unwrap();
        assert!(!stack.is_mapped());
        assert!(!stack.has_guard());
        assert_eq!(stack.size(), 32 * 1024);
        unsafe { stack.top().sub(8).write(1) };
    }

    #[test]
    fn test_raw_allocation_failure() {
        let err = Stack::map(1 << 62, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        let err = Stack::heap(1 << 62).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_error_policy_returns_out_of_memory() {
        for allocator in [StackAllocator::Mmap, StackAllocator::Heap] {
            let err =
                Stack::allocate_exact(1 << 62, allocator, true, AllocFailurePolicy::Error)
                    .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfMemory, "{:?}", allocator);
        }
        // the same entry point succeeds for a sane size
        let size = normalize_size(0, 64 * 1024);
        let stack =
            Stack::allocate_exact(size, StackAllocator::Mmap, false, AllocFailurePolicy::Error)
                .unwrap();
        assert_eq!(stack.size(), size);
    }
}
