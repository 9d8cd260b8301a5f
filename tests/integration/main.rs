mod locks;
mod shared;
mod state_handlers;
mod watchers;
