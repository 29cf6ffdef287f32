//! Owner loop used by the integration tests.

use std::fmt;
use std::hash::Hash;
use std::thread::{self, JoinHandle};

use chanrpc::{Server, ServerHandle};
use crossbeam_channel::{Sender, select};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A server running on its own thread.
pub struct Owner<K, V: Send + 'static> {
    handle: ServerHandle<K, V>,
    stop: Sender<()>,
    join: JoinHandle<usize>,
}

impl<K, V> Owner<K, V>
where
    K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Moves `server` onto a new thread that dispatches calls until stopped,
    /// then closes the server.
    pub fn spawn(server: Server<K, V>) -> Self {
        let handle = server.handle();
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let join = thread::spawn(move || {
            let mut executed = 0;
            loop {
                select! {
                    recv(server.call_queue()) -> ci => match ci {
                        Ok(ci) => {
                            let _ = server.exec(ci);
                            executed += 1;
                        }
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => break,
                }
            }
            server.close();
            executed
        });

        Self { handle, stop, join }
    }

    pub fn handle(&self) -> &ServerHandle<K, V> {
        &self.handle
    }

    /// Stops the loop and returns how many calls it executed.
    pub fn stop(self) -> usize {
        let _ = self.stop.send(());
        self.join.join().unwrap()
    }
}
