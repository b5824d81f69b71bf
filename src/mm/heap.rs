// Small-object allocator: a bounded region carved out below the physical
// page pool, backed by `linked_list_allocator`.

use linked_list_allocator::LockedHeap;

pub const HEAP_SIZE: usize = 2 * 1024 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initializes the heap over `[start, end)`. Called once from
/// `mm::address_space::init`, after that range has been mapped.
pub fn init(start: usize, end: usize) {
    unsafe {
        ALLOCATOR.lock().init(start as *mut u8, end - start);
    }
}

#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("mm: heap allocation failed, layout = {:?}", layout);
}
