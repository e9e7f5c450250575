use std::io;

pub trait TerminalMode: Send + Sync {
    fn enter_raw(&self) -> io::Result<()>;
    fn restore(&self) -> io::Result<()>;
}
