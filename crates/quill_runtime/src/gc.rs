use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A shared, mutable pointer to a heap object.
///
/// Backed by `Rc<RefCell<T>>`: objects live as long as something refers
/// to them. Reference cycles between scopes and closures are not reclaimed.
#[derive(Debug)]
pub struct GcPtr<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> GcPtr<T> {
    pub fn new(value: T) -> Self {
        GcPtr {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, T> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Return the number of strong references.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Check pointer identity (same allocation).
    pub fn ptr_eq(&self, other: &GcPtr<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the allocation, for identity maps and diagnostics.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        GcPtr {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Display> fmt::Display for GcPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_allocation() {
        let a = GcPtr::new(1);
        let b = a.clone();
        *b.borrow_mut() = 7;
        assert_eq!(*a.borrow(), 7);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(a.addr(), b.addr());
    }

    #[test]
    fn equality_is_identity() {
        let a = GcPtr::new(1);
        let b = GcPtr::new(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
