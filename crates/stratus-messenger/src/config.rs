use std::time::Duration;

/// Opcodes the coordinator answers on its control (TCP) and metrics (UDP) ports.
pub const GET_NUM_CONNS: u32 = 4;
pub const GET_NUM_UPDATES: u32 = 5;
pub const GET_LAST_TIME_ERROR: u32 = 9;

#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Bound on connect, send and receive of one query.
    pub timeout: Duration,
    pub conn_count_opcode: u32,
    pub time_loss_opcode: u32,
    pub update_count_opcode: u32,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            conn_count_opcode: GET_NUM_CONNS,
            time_loss_opcode: GET_LAST_TIME_ERROR,
            update_count_opcode: GET_NUM_UPDATES,
        }
    }
}

impl MessengerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_conn_count_opcode(mut self, opcode: u32) -> Self {
        self.conn_count_opcode = opcode;
        self
    }

    pub fn with_time_loss_opcode(mut self, opcode: u32) -> Self {
        self.time_loss_opcode = opcode;
        self
    }

    pub fn with_update_count_opcode(mut self, opcode: u32) -> Self {
        self.update_count_opcode = opcode;
        self
    }
}
