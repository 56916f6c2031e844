extern crate rtc_i2c;

use chrono::Utc;
use linux_embedded_hal::I2cdev;
use rtc_i2c::hal::HalBus;
use rtc_i2c::{BusController, Direction};

/// Example reading the clock registers of a DS3231 through a transaction.
/// The transaction restarts twice, so the bus is driven through
///  `Transactional::exec`, which keeps every repeated start.
///  Assumptions:
///  - The host this example runs on behaves like a Raspberry Pi 3+ running linux
///  - The DS3231 is attached to i2c1 on the host
///
/// Enable i2c-1 on a Raspberry Pi 3+ using `sudo raspi-config`
///  and connect the SDA, SCL, GND, and 3.3V pins from RPi to the RTC

const DS3231_ADDRESS: u8 = 0x68;
const REG_SECONDS: u8 = 0x00;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;

fn bcd_to_bin(value: u8) -> u8 {
    ((value & 0xF0) >> 4) * 10 + (value & 0x0F)
}

fn main() {
    // Initialize the I2C bus (device)
    let i2c = I2cdev::new("/dev/i2c-1").expect("Failed to open I2C device");
    let bus = HalBus::new_transactional(i2c);
    // single thread, nothing else on this bus: no lock needed
    let rtc = BusController::new(&bus, 1);

    rtc.ping(DS3231_ADDRESS).expect("no DS3231 at 0x68");

    let mut time = [0u8; 3];
    let mut control = [0u8; 2];
    {
        // seconds..hours, then control and status after a restart
        let mut op = rtc.create_read_op(DS3231_ADDRESS, Some(REG_SECONDS), "now");
        op.read(&mut time).expect("queue time read");
        op.restart_reg(DS3231_ADDRESS, REG_CONTROL, Direction::Read).expect("restart");
        op.read(&mut control).expect("queue control read");
        op.execute().expect("read clock registers");
    }

    let sys_dt = Utc::now().naive_utc();
    println!("sys {}\r\nrtc {:02}:{:02}:{:02}",
             sys_dt, bcd_to_bin(time[2] & 0x3F), bcd_to_bin(time[1]), bcd_to_bin(time[0] & 0x7F));
    println!("control 0x{:02x} status 0x{:02x}", control[0], control[1]);

    let status = rtc.read_register(DS3231_ADDRESS, REG_STATUS).expect("read status");
    println!("oscillator stopped: {}", status & 0x80 != 0);
}
