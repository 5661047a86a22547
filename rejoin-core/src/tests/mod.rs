//! End-to-end pipeline tests spanning multiple subsystems
