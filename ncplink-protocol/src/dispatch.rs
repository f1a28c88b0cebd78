//! Command dispatch tables.
//!
//! A [`DispatchTable`] maps command identifiers to handlers. Tables are built
//! once with [`DispatchTableBuilder`] and are immutable afterwards, so lookups
//! from any number of tasks need no locking. The same type serves both link
//! endpoints; each side supplies its own context type `C`.

use crate::command::Command;
use crate::status::Status;
use bytes::Bytes;
use std::fmt;

/// Output of a handler: the response payload, or the status to report.
pub type HandlerResult = Result<Bytes, Status>;

/// A command handler.
pub trait Handler<C: ?Sized>: Send + Sync {
    fn call(&self, ctx: &C, input: &[u8]) -> HandlerResult;
}

impl<C: ?Sized, F> Handler<C> for F
where
    F: Fn(&C, &[u8]) -> HandlerResult + Send + Sync,
{
    fn call(&self, ctx: &C, input: &[u8]) -> HandlerResult {
        self(ctx, input)
    }
}

struct Entry<C: ?Sized> {
    id: u16,
    handler: Box<dyn Handler<C>>,
}

/// Read-only registry of command handlers, sorted by identifier.
pub struct DispatchTable<C: ?Sized> {
    entries: Vec<Entry<C>>,
}

impl<C: ?Sized> DispatchTable<C> {
    pub fn builder() -> DispatchTableBuilder<C> {
        DispatchTableBuilder {
            entries: Vec::new(),
        }
    }

    /// Looks up and invokes the handler for `id`.
    ///
    /// Returns [`Status::Unsupported`] without invoking anything when no
    /// handler is registered.
    pub fn dispatch(&self, ctx: &C, id: u16, input: &[u8]) -> HandlerResult {
        match self.lookup(id) {
            Some(handler) => handler.call(ctx, input),
            None => Err(Status::Unsupported),
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        self.lookup(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    fn lookup(&self, id: u16) -> Option<&dyn Handler<C>> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| self.entries[i].handler.as_ref())
    }
}

impl<C: ?Sized> fmt::Debug for DispatchTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("commands", &self.entries.len())
            .finish()
    }
}

/// Collects handlers before freezing them into a [`DispatchTable`].
pub struct DispatchTableBuilder<C: ?Sized> {
    entries: Vec<Entry<C>>,
}

impl<C: ?Sized> DispatchTableBuilder<C> {
    /// Registers a handler for a raw identifier. A later registration for
    /// the same identifier replaces the earlier one.
    pub fn register_id(mut self, id: u16, handler: impl Handler<C> + 'static) -> Self {
        self.entries.retain(|e| e.id != id);
        self.entries.push(Entry {
            id,
            handler: Box::new(handler),
        });
        self
    }

    /// Registers a handler for a catalog command.
    pub fn register(self, command: Command, handler: impl Handler<C> + 'static) -> Self {
        self.register_id(command.id(), handler)
    }

    pub fn build(mut self) -> DispatchTable<C> {
        self.entries.sort_by_key(|e| e.id);
        DispatchTable {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    fn echo(ctx: &Counter, input: &[u8]) -> HandlerResult {
        ctx.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::copy_from_slice(input))
    }

    fn reject(_ctx: &Counter, _input: &[u8]) -> HandlerResult {
        Err(Status::BadArgument)
    }

    fn table() -> DispatchTable<Counter> {
        DispatchTable::builder()
            .register(Command::NetworkStart, echo)
            .register(Command::NetworkPanIdSet, reject)
            .register_id(0x0900, |_: &Counter, _: &[u8]| {
                Ok::<_, Status>(Bytes::from_static(&[7]))
            })
            .build()
    }

    #[test]
    fn test_dispatch_invokes_handler() {
        let ctx = Counter::default();
        let out = table().dispatch(&ctx, 0x0001, &[0x01]).unwrap();
        assert_eq!(&out[..], &[0x01]);
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_has_no_side_effects() {
        let ctx = Counter::default();
        let result = table().dispatch(&ctx, 0x0042, &[0x01]);
        assert_eq!(result, Err(Status::Unsupported));
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_status_propagates() {
        let ctx = Counter::default();
        let result = table().dispatch(&ctx, Command::NetworkPanIdSet.id(), &[]);
        assert_eq!(result, Err(Status::BadArgument));
    }

    #[test]
    fn test_ids_sorted_and_replaced() {
        let table: DispatchTable<Counter> = DispatchTable::builder()
            .register_id(0x0300, echo)
            .register_id(0x0001, echo)
            .register_id(0x0300, reject)
            .build();

        assert_eq!(table.ids().collect::<Vec<_>>(), vec![0x0001, 0x0300]);
        assert_eq!(table.len(), 2);
        assert!(table.contains(0x0300));
        assert_eq!(
            table.dispatch(&Counter::default(), 0x0300, &[]),
            Err(Status::BadArgument)
        );
    }

    #[test]
    fn test_closure_handler() {
        let out = table().dispatch(&Counter::default(), 0x0900, &[]).unwrap();
        assert_eq!(&out[..], &[7]);
    }
}
